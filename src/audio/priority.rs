//! Real-time scheduling for the audio thread.

/// Ask the OS to run the calling thread ahead of normal threads.
///
/// Best effort: without the needed privileges (rtprio limit, CAP_SYS_NICE)
/// the thread keeps its default class and only timing robustness suffers.
/// Returns whether the request was granted.
#[cfg(unix)]
pub fn request_realtime() -> bool {
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max < 0 {
            log::warn!("SCHED_FIFO not available, keeping default scheduling");
            return false;
        }

        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = max;
        let ret = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if ret != 0 {
            log::warn!(
                "Could not elevate audio thread to SCHED_FIFO (errno {}), keeping default scheduling",
                ret
            );
            return false;
        }
    }
    log::debug!("Audio thread running with SCHED_FIFO");
    true
}

#[cfg(not(unix))]
pub fn request_realtime() -> bool {
    log::warn!("Real-time scheduling not supported on this platform");
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_not_fatal() {
        // the result depends on the privileges of the test runner, it only
        // has to come back
        std::thread::spawn(request_realtime).join().unwrap();
    }
}
