//! Exercises the same opcode -> `Backend` method mapping `QueueRunner::service`
//! uses, against a real backend, without needing a kernel or an open
//! `/dev/ublkcN` to drive it through a `Ring`.

use ublk_backends::RamBackend;
use ublk_core::backend::{result_to_wire, Backend};
use ublk_core::descriptor::{flags, op, IoDescriptor, SECTOR_SIZE};

fn dispatch(backend: &dyn Backend, desc: &IoDescriptor, buf: &mut [u8]) -> i32 {
    let offset = desc.byte_offset();
    let len = desc.byte_len() as usize;
    let outcome = match desc.op() {
        op::READ => backend.read_at(offset, &mut buf[..len]),
        op::WRITE => {
            let r = backend.write_at(offset, &buf[..len]);
            if r.is_ok() && desc.is_fua() {
                backend.sync().and(r)
            } else {
                r
            }
        }
        op::FLUSH => backend.flush().map(|_| 0),
        op::DISCARD => backend.discard(offset, desc.byte_len()).map(|_| 0),
        op::WRITE_ZEROES => backend.write_zeroes(offset, desc.byte_len()).map(|_| 0),
        _ => unreachable!(),
    };
    result_to_wire(outcome)
}

fn desc(opcode: u8, start_sector: u64, nr_sectors: u32, fua: bool) -> IoDescriptor {
    let mut op_flags = opcode as u32;
    if fua {
        op_flags |= flags::FUA;
    }
    IoDescriptor { op_flags, nr_sectors, start_sector, addr: 0 }
}

#[test]
fn scenario_write_then_read_back() {
    let backend = RamBackend::new(1 << 20);
    let mut write_buf = vec![0x42u8; 4096];
    let write_desc = desc(op::WRITE, 0, (4096 / SECTOR_SIZE) as u32, false);
    let res = dispatch(&backend, &write_desc, &mut write_buf);
    assert_eq!(res, 0); // write result is a committed-or-not flag, not a byte count

    let mut read_buf = vec![0u8; 4096];
    let read_desc = desc(op::READ, 0, (4096 / SECTOR_SIZE) as u32, false);
    let n = dispatch(&backend, &read_desc, &mut read_buf);
    assert_eq!(n, 4096);
    assert_eq!(read_buf, write_buf);
}

#[test]
fn scenario_fua_write_forces_sync() {
    let backend = RamBackend::new(4096);
    let mut buf = vec![0xaa; 512];
    let write_desc = desc(op::WRITE, 0, 1, true);
    let res = dispatch(&backend, &write_desc, &mut buf);
    assert_eq!(res, 0);
}

#[test]
fn scenario_discard_then_read_is_zero() {
    let backend = RamBackend::new(4096);
    backend.write_at(0, &[0xff; 4096]).unwrap();
    let mut empty = [];
    let discard_desc = desc(op::DISCARD, 0, (4096 / SECTOR_SIZE) as u32, false);
    let res = dispatch(&backend, &discard_desc, &mut empty);
    assert_eq!(res, 0);

    let mut out = vec![0u8; 4096];
    let read_desc = desc(op::READ, 0, (4096 / SECTOR_SIZE) as u32, false);
    dispatch(&backend, &read_desc, &mut out);
    assert!(out.iter().all(|&b| b == 0));
}

#[test]
fn scenario_write_zeroes_matches_discard_result() {
    let backend = RamBackend::new(4096);
    backend.write_at(0, &[0x11; 4096]).unwrap();
    let mut empty = [];
    let wz_desc = desc(op::WRITE_ZEROES, 0, (4096 / SECTOR_SIZE) as u32, false);
    let res = dispatch(&backend, &wz_desc, &mut empty);
    assert_eq!(res, 0);
    let mut out = vec![0u8; 4096];
    backend.read_at(0, &mut out).unwrap();
    assert!(out.iter().all(|&b| b == 0));
}

#[test]
fn scenario_flush_is_a_no_op_on_ram_backend() {
    let backend = RamBackend::new(4096);
    let mut empty = [];
    let flush_desc = desc(op::FLUSH, 0, 0, false);
    assert_eq!(dispatch(&backend, &flush_desc, &mut empty), 0);
}

#[test]
fn scenario_oversize_request_is_rejected_before_dispatch() {
    use ublk_runtime::BufferPool;
    let pool = BufferPool::new(1, 4096);
    let oversize = desc(op::READ, 0, (8192 / SECTOR_SIZE) as u32, false);
    assert!(pool.check_fits(&oversize).is_err());
}
