//! Frame-pointer stack walking for a ptrace-stopped thread
//!
//! The target's memory is read with `process_vm_readv`; the thread must
//! already be in a ptrace stop so its registers are stable. Walking uses
//! the x86_64 frame pointer convention and may truncate early for
//! binaries built with `-fomit-frame-pointer` - a truncated walk still
//! yields the leaf instruction pointer.

use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::unistd::Pid;
use std::io::IoSliceMut;

/// Maximum frames to walk (prevents loops through corrupt frame chains)
const MAX_STACK_DEPTH: usize = 64;

/// Walk the frame pointer chain of a stopped thread.
///
/// Returns instruction pointers leaf-first: index 0 is where the thread
/// was executing, subsequent entries are return addresses. Never fails;
/// whatever prefix of the chain is readable is returned, and the leaf IP
/// is always present.
///
/// Stack layout at each RBP:
///   [rbp+0]: saved RBP (previous frame)
///   [rbp+8]: return address
pub fn walk_frame_pointers(tid: Pid, regs: &libc::user_regs_struct) -> Vec<u64> {
    let mut addrs = Vec::with_capacity(16);
    addrs.push(regs.rip);

    let mut rbp = regs.rbp;
    for _ in 0..MAX_STACK_DEPTH {
        if rbp == 0 {
            break; // end of chain
        }

        let saved_rbp = match read_u64(tid, rbp) {
            Ok(v) => v,
            Err(_) => break,
        };
        let return_address = match read_u64(tid, rbp.wrapping_add(8)) {
            Ok(v) => v,
            Err(_) => break,
        };
        if return_address == 0 {
            break;
        }
        // The chain must grow toward higher addresses; anything else is
        // a corrupt or reused frame slot.
        if saved_rbp != 0 && saved_rbp <= rbp {
            addrs.push(return_address);
            break;
        }

        addrs.push(return_address);
        rbp = saved_rbp;
    }

    addrs
}

/// Read a u64 from the remote thread's address space.
fn read_u64(tid: Pid, addr: u64) -> nix::Result<u64> {
    let mut buffer = [0u8; 8];
    let mut local_iov = [IoSliceMut::new(&mut buffer)];
    let remote_iov = [RemoteIoVec {
        base: addr as usize,
        len: 8,
    }];

    process_vm_readv(tid, &mut local_iov, &remote_iov)?;

    Ok(u64::from_ne_bytes(buffer))
}
