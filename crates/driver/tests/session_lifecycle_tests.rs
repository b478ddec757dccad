//! Integration tests for the session lifecycle
//!
//! Tests attach, detach and bus reset handling including:
//! - Classification gating
//! - Buffer sizing and first-match endpoint selection
//! - Allocation accounting on every failure path
//! - Reset window behaviour

use driver::test_utils::{
    MockDevice, bulk_in, bulk_out, control, counting_manager, counting_manager_with,
    identity_for, interrupt_in, standard_endpoints,
};
use driver::{
    AttachError, CountingAllocator, DEVICE_TABLE, DeviceKey, HostStatus, LifecycleState,
    ResetOutcome,
};
use std::sync::Arc;

fn key() -> DeviceKey {
    DeviceKey::new(1, 5, 0)
}

fn device() -> Arc<MockDevice> {
    Arc::new(MockDevice::new("ubertooth"))
}

mod classification {
    use super::*;

    #[test]
    fn test_recognized_attaches() {
        let (mut manager, counter) = counting_manager();
        let session = manager
            .attach(key(), device(), identity_for(0x1d50, 0x6002), &standard_endpoints())
            .unwrap();

        assert_eq!(session.identity().product_id, 0x6002);
        assert_eq!(counter.outstanding(), 2);
    }

    #[test]
    fn test_non_recognized_table_entries_rejected_without_allocation() {
        for entry in DEVICE_TABLE
            .iter()
            .filter(|e| !(e.vendor_id == 0x1d50 && e.product_id == 0x6002))
        {
            let (mut manager, counter) = counting_manager();
            let err = manager
                .attach(
                    key(),
                    device(),
                    identity_for(entry.vendor_id, entry.product_id),
                    &standard_endpoints(),
                )
                .unwrap_err();

            assert!(
                matches!(err, AttachError::UnsupportedDevice { .. }),
                "{:04x}:{:04x} gave {:?}",
                entry.vendor_id,
                entry.product_id,
                err
            );
            assert_eq!(err.host_status(), HostStatus::NotSupported);
            assert_eq!(counter.allocations(), 0);
            assert_eq!(manager.state(&key()), LifecycleState::Unattached);
        }
    }

    #[test]
    fn test_bootloader_message() {
        let (mut manager, _counter) = counting_manager();
        let err = manager
            .attach(key(), device(), identity_for(0x1d50, 0x6003), &standard_endpoints())
            .unwrap_err();

        assert_eq!(
            err,
            AttachError::UnsupportedDevice {
                reason: "Bootloader mode not yet supported"
            }
        );
    }

    #[test]
    fn test_unknown_id_rejected_not_panicking() {
        let (mut manager, counter) = counting_manager();
        let err = manager
            .attach(key(), device(), identity_for(0x1234, 0x5678), &standard_endpoints())
            .unwrap_err();

        assert!(matches!(err, AttachError::UnsupportedDevice { .. }));
        assert_eq!(counter.allocations(), 0);
    }

    #[test]
    fn test_unsupported_is_stable_across_calls() {
        let (mut manager, _counter) = counting_manager();
        let identity = identity_for(0x1d50, 0x6000);

        let first = manager
            .attach(key(), device(), identity, &standard_endpoints())
            .unwrap_err();
        let second = manager
            .attach(key(), device(), identity, &standard_endpoints())
            .unwrap_err();

        assert_eq!(first, second);
        assert!(matches!(second, AttachError::UnsupportedDevice { .. }));
    }
}

mod endpoints {
    use super::*;

    #[test]
    fn test_buffer_sizes_match_max_packet_size() {
        let (mut manager, _counter) = counting_manager();
        let session = manager
            .attach(
                key(),
                device(),
                identity_for(0x1d50, 0x6002),
                &[bulk_out(0x05, 512), bulk_in(0x82, 64)],
            )
            .unwrap();

        assert_eq!(session.bulk_in().buffer().len(), 64);
        assert_eq!(session.bulk_out().buffer().len(), 512);
    }

    #[test]
    fn test_first_bulk_in_wins() {
        let (mut manager, counter) = counting_manager();
        let session = manager
            .attach(
                key(),
                device(),
                identity_for(0x1d50, 0x6002),
                &[
                    bulk_in(0x81, 32),
                    bulk_in(0x82, 64),
                    bulk_out(0x05, 64),
                    bulk_out(0x06, 512),
                ],
            )
            .unwrap();

        assert_eq!(session.bulk_in().endpoint().address, 0x81);
        assert_eq!(session.bulk_in().buffer().len(), 32);
        assert_eq!(session.bulk_out().endpoint().address, 0x05);
        // Ignored endpoints get no buffer
        assert_eq!(counter.allocations(), 2);
    }

    #[test]
    fn test_control_endpoint_recorded_without_buffer() {
        let (mut manager, counter) = counting_manager();
        let session = manager
            .attach(
                key(),
                device(),
                identity_for(0x1d50, 0x6002),
                &[control(0x00, 64), bulk_in(0x82, 64), bulk_out(0x05, 64)],
            )
            .unwrap();

        assert_eq!(session.control().map(|ep| ep.address), Some(0x00));
        assert_eq!(counter.allocations(), 2);
    }

    #[test]
    fn test_missing_bulk_in() {
        let (mut manager, counter) = counting_manager();
        let err = manager
            .attach(
                key(),
                device(),
                identity_for(0x1d50, 0x6002),
                &[interrupt_in(0x81, 8), bulk_out(0x05, 64)],
            )
            .unwrap_err();

        assert_eq!(
            err,
            AttachError::EndpointsNotFound {
                bulk_in: false,
                bulk_out: true
            }
        );
        assert_eq!(counter.allocations(), 1);
        assert_eq!(counter.outstanding(), 0);
        assert!(manager.session(&key()).is_none());
    }

    #[test]
    fn test_empty_endpoint_list() {
        let (mut manager, counter) = counting_manager();
        let err = manager
            .attach(key(), device(), identity_for(0x1d50, 0x6002), &[])
            .unwrap_err();

        assert_eq!(err.host_status(), HostStatus::NoSuchDevice);
        assert_eq!(counter.outstanding(), 0);
    }

    #[test]
    fn test_failed_attach_drops_device_reference() {
        let (mut manager, _counter) = counting_manager();
        let dev = device();
        let _ = manager.attach(
            key(),
            Arc::clone(&dev),
            identity_for(0x1d50, 0x6002),
            &[bulk_in(0x82, 64)],
        );

        assert_eq!(Arc::strong_count(&dev), 1);
    }
}

mod out_of_memory {
    use super::*;

    #[test]
    fn test_second_allocation_fails_releases_first() {
        let (mut manager, counter) = counting_manager_with(CountingAllocator::failing_after(1));
        let err = manager
            .attach(key(), device(), identity_for(0x1d50, 0x6002), &standard_endpoints())
            .unwrap_err();

        assert!(matches!(err, AttachError::OutOfMemory(_)));
        assert_eq!(err.host_status(), HostStatus::OutOfMemory);
        assert_eq!(counter.allocations(), 1);
        assert_eq!(counter.outstanding(), 0);
        assert_eq!(manager.state(&key()), LifecycleState::Unattached);
    }

    #[test]
    fn test_first_allocation_fails() {
        let (mut manager, counter) = counting_manager_with(CountingAllocator::failing_after(0));
        let err = manager
            .attach(key(), device(), identity_for(0x1d50, 0x6002), &standard_endpoints())
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(counter.outstanding(), 0);
    }
}

mod detach {
    use super::*;

    #[test]
    fn test_detach_frees_both_buffers_and_association() {
        let (mut manager, counter) = counting_manager();
        let dev = device();
        manager
            .attach(
                key(),
                Arc::clone(&dev),
                identity_for(0x1d50, 0x6002),
                &standard_endpoints(),
            )
            .unwrap();
        assert_eq!(Arc::strong_count(&dev), 2);

        assert!(manager.detach(&key()));
        assert_eq!(counter.releases(), 2);
        assert_eq!(counter.outstanding(), 0);
        assert_eq!(Arc::strong_count(&dev), 1);
        assert!(manager.session(&key()).is_none());
    }

    #[test]
    fn test_detach_during_reset_window() {
        let (mut manager, counter) = counting_manager();
        manager
            .attach(key(), device(), identity_for(0x1d50, 0x6002), &standard_endpoints())
            .unwrap();

        manager.pre_reset(&key());
        assert!(manager.detach(&key()));
        assert_eq!(counter.outstanding(), 0);
        assert_eq!(manager.post_reset(&key()), ResetOutcome::Suppressed);
    }

    #[test]
    fn test_reattach_after_detach() {
        let (mut manager, counter) = counting_manager();
        for _ in 0..3 {
            manager
                .attach(key(), device(), identity_for(0x1d50, 0x6002), &standard_endpoints())
                .unwrap();
            manager.detach(&key());
        }

        assert_eq!(counter.allocations(), 6);
        assert_eq!(counter.outstanding(), 0);
    }
}

mod reset {
    use super::*;

    fn attached() -> driver::SessionManager<MockDevice> {
        let (mut manager, _counter) = counting_manager();
        manager
            .attach(key(), device(), identity_for(0x1d50, 0x6002), &standard_endpoints())
            .unwrap();
        manager
    }

    #[test]
    fn test_running_restored() {
        let mut manager = attached();
        manager.start_transfers(&key());

        assert_eq!(manager.pre_reset(&key()), ResetOutcome::Allowed);
        assert!(!manager.session(&key()).unwrap().is_running());

        assert_eq!(manager.post_reset(&key()), ResetOutcome::Allowed);
        assert!(manager.session(&key()).unwrap().is_running());
    }

    #[test]
    fn test_idle_stays_idle() {
        let mut manager = attached();

        manager.pre_reset(&key());
        manager.post_reset(&key());
        assert!(!manager.session(&key()).unwrap().is_running());
    }

    #[test]
    fn test_register_lock_held_across_window() {
        let mut manager = attached();
        let registers = manager.session(&key()).unwrap().register_lock();

        manager.pre_reset(&key());
        assert!(registers.try_lock().is_err());

        manager.post_reset(&key());
        assert!(registers.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_reset_window_inside_runtime() {
        let mut manager = attached();
        manager.start_transfers(&key());
        let registers = manager.session(&key()).unwrap().register_lock();

        assert_eq!(manager.pre_reset(&key()), ResetOutcome::Allowed);
        assert_eq!(manager.state(&key()), LifecycleState::ResetPending);
        assert!(registers.try_lock().is_err());

        assert_eq!(manager.post_reset(&key()), ResetOutcome::Allowed);
        assert!(registers.try_lock().is_ok());
        assert!(manager.session(&key()).unwrap().is_running());
    }

    #[tokio::test]
    async fn test_busy_register_lock_inside_runtime() {
        let mut manager = attached();
        manager.start_transfers(&key());
        let registers = manager.session(&key()).unwrap().register_lock();
        let held = registers.clone().try_lock_owned().unwrap();

        assert_eq!(manager.pre_reset(&key()), ResetOutcome::Allowed);
        assert_eq!(manager.state(&key()), LifecycleState::ResetPending);
        assert!(!manager.session(&key()).unwrap().is_running());

        assert_eq!(manager.post_reset(&key()), ResetOutcome::Allowed);
        assert!(manager.session(&key()).unwrap().is_running());

        drop(held);
        assert!(registers.try_lock().is_ok());
    }

    #[test]
    fn test_busy_register_lock_waits_outside_runtime() {
        let mut manager = attached();
        let registers = manager.session(&key()).unwrap().register_lock();
        let held = registers.clone().try_lock_owned().unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            drop(held);
        });

        assert_eq!(manager.pre_reset(&key()), ResetOutcome::Allowed);
        releaser.join().unwrap();
        assert!(registers.try_lock().is_err());

        manager.post_reset(&key());
        assert!(registers.try_lock().is_ok());
    }

    #[test]
    fn test_post_reset_without_session_is_noop() {
        let (mut manager, _counter) = counting_manager();
        assert_eq!(manager.post_reset(&key()), ResetOutcome::Suppressed);
        assert_eq!(manager.pre_reset(&key()), ResetOutcome::Suppressed);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_post_reset_without_pre_reset_is_noop() {
        let mut manager = attached();
        manager.start_transfers(&key());

        assert_eq!(manager.post_reset(&key()), ResetOutcome::Suppressed);
        assert!(manager.session(&key()).unwrap().is_running());
        assert_eq!(manager.state(&key()), LifecycleState::Attached);
    }

    #[test]
    fn test_double_pre_reset_keeps_first_state() {
        let mut manager = attached();
        manager.start_transfers(&key());

        manager.pre_reset(&key());
        // Second call sees transfers stopped but must not overwrite the record
        assert_eq!(manager.pre_reset(&key()), ResetOutcome::Allowed);
        manager.post_reset(&key());

        assert!(manager.session(&key()).unwrap().is_running());
    }
}

mod properties {
    use super::*;
    use driver::{EndpointDescriptor, TransferKind};
    use proptest::prelude::*;

    fn endpoint() -> impl Strategy<Value = EndpointDescriptor> {
        (
            any::<u8>(),
            prop_oneof![
                Just(TransferKind::Bulk),
                Just(TransferKind::Control),
                Just(TransferKind::Other)
            ],
            0u16..=1024,
        )
            .prop_map(|(address, kind, mps)| EndpointDescriptor::new(address, kind, mps))
    }

    proptest! {
        #[test]
        fn prop_first_match_and_no_leaks(
            endpoints in proptest::collection::vec(endpoint(), 0..12)
        ) {
            let (mut manager, counter) = counting_manager();
            let first_in = endpoints.iter().find(|ep| ep.is_bulk_in()).copied();
            let first_out = endpoints.iter().find(|ep| ep.is_bulk_out()).copied();

            let result = manager.attach(key(), device(), identity_for(0x1d50, 0x6002), &endpoints);

            match (first_in, first_out) {
                (Some(bulk_in), Some(bulk_out)) => {
                    let session = result.unwrap();
                    prop_assert_eq!(*session.bulk_in().endpoint(), bulk_in);
                    prop_assert_eq!(*session.bulk_out().endpoint(), bulk_out);
                    prop_assert_eq!(
                        session.bulk_in().buffer().len(),
                        usize::from(bulk_in.max_packet_size)
                    );
                    prop_assert_eq!(
                        session.bulk_out().buffer().len(),
                        usize::from(bulk_out.max_packet_size)
                    );
                    prop_assert_eq!(counter.outstanding(), 2);
                }
                _ => {
                    let is_missing = matches!(result, Err(AttachError::EndpointsNotFound { .. }));
                    prop_assert!(is_missing);
                    prop_assert_eq!(counter.outstanding(), 0);
                }
            }

            manager.detach_all();
            prop_assert_eq!(counter.outstanding(), 0);
        }
    }
}
