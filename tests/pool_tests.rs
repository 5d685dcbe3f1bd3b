// Worker pool tests with real worker processes

use prefork::core::net::Socket;
use prefork::core::process::{ProcessRole, Split, TerminationReason, WorkerPool};
use prefork::ServerError;
use std::cell::RefCell;
use std::os::unix::io::OwnedFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

mod common;
use common::wait_for;

fn spare_socket() -> (UnixStream, Socket) {
    let (keep, give) = UnixStream::pair().unwrap();
    (keep, Socket::new(OwnedFd::from(give)))
}

#[test]
fn test_start_twice_forks_once() {
    let roles = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&roles);

    let mut pool = WorkerPool::new(2);
    pool.set_fork_hook(move |role| seen.borrow_mut().push(role));

    if let Split::Worker(_) = pool.start().unwrap() {
        unsafe { libc::_exit(0) };
    }
    assert!(matches!(pool.start().unwrap(), Split::Parent));

    let pids = pool.worker_pids();
    assert_eq!(pids.len(), 2);
    assert_eq!(
        *roles.borrow(),
        vec![
            ProcessRole::Parent { worker: 0, pid: pids[0] },
            ProcessRole::Parent { worker: 1, pid: pids[1] },
        ]
    );

    let mut exited = Vec::new();
    let all = wait_for(Duration::from_secs(10), || {
        exited.extend(pool.reap_exited());
        (exited.len() == 2).then_some(())
    });
    assert!(all.is_some());
    assert!(exited
        .iter()
        .all(|(_, reason)| *reason == TerminationReason::Exited(0)));
}

#[test]
fn test_dead_worker_reports_transfer_failure() {
    let mut pool = WorkerPool::new(2);
    if let Split::Worker(_) = pool.start().unwrap() {
        loop {
            unsafe { libc::pause() };
        }
    }

    let pids = pool.worker_pids();
    unsafe { libc::kill(pids[0], libc::SIGKILL) };

    let reaped = wait_for(Duration::from_secs(10), || {
        pool.reap_exited().into_iter().next()
    });
    assert_eq!(reaped, Some((0, TerminationReason::Signaled(libc::SIGKILL))));

    // Worker 0 is next in rotation and gone; the parent carries on.
    let (mut peer, socket) = spare_socket();
    let err = pool.dispatch(socket, 1).unwrap_err();
    assert!(err.is_transfer_failure());
    assert!(matches!(err, ServerError::WorkerExited { worker: 0, .. }));
    let mut buf = [0u8; 1];
    assert_eq!(std::io::Read::read(&mut peer, &mut buf).unwrap(), 0);

    let (_peer, socket) = spare_socket();
    assert_eq!(pool.dispatch(socket, 2).unwrap(), 1);

    unsafe { libc::kill(pids[1], libc::SIGKILL) };
}
