//! One-host loopback mirror over the software tcp provider: a target
//! advertises its regions, an initiator connects and writes one grain,
//! and the target observes the matching completion with the bytes
//! landed in its registered region.

use std::time::Duration;

use mxl_fabric::{FabricInitiator, FabricTarget, Provider, Region, RegionGroup, TargetInfo};
use mxl_status::StatusCode;

#[test]
fn transfer_grain_arrives_at_target() {
    let payload = vec![0xABu8; 64];
    let mut recv_buf = vec![0u8; 64];

    let target_regions = RegionGroup(vec![Region::host(recv_buf.as_mut_ptr() as usize, 64)]);
    let mut target = FabricTarget::setup(Provider::Tcp, target_regions).unwrap();
    let info: TargetInfo = target.target_info().unwrap();
    let decoded = TargetInfo::from_base64(&info.to_base64().unwrap()).unwrap();

    let source_regions = RegionGroup(vec![Region::host(payload.as_ptr() as usize, 64)]);
    let mut initiator = FabricInitiator::setup(Provider::Tcp, source_regions).unwrap();
    initiator.add_target(&decoded).unwrap();

    loop {
        match initiator.transfer_grain(0, &payload) {
            Ok(()) => break,
            Err(e) if e.code == StatusCode::NotReady => {
                initiator.make_progress(Duration::from_millis(50)).unwrap();
            }
            Err(e) => panic!("transfer_grain failed: {e}"),
        }
    }

    let index = target.wait_for_new_grain(Duration::from_secs(2)).unwrap();
    assert_eq!(index, 0);
    assert_eq!(recv_buf, payload);
}
