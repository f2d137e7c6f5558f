use std::{
    io::Result as IoResult,
    sync::atomic::{AtomicUsize, Ordering},
    thread::Builder as ThreadBuilder,
};

static TASK_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

// 每个异步请求独占一个线程，不做线程复用
pub(crate) fn spawn<F: FnOnce() + Send + 'static>(task_name: &str, f: F) -> IoResult<()> {
    let seq = TASK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ThreadBuilder::new()
        .name(format!("{task_name}-{seq}"))
        .spawn(f)
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread::sleep,
        time::{Duration, Instant},
    };

    #[test]
    fn test_spawn() -> IoResult<()> {
        env_logger::builder().is_test(true).try_init().ok();

        let spawned = Arc::new(AtomicUsize::new(0));
        for _ in 0..100usize {
            let spawned = spawned.to_owned();
            spawn("test-task", move || {
                spawned.fetch_add(1, Ordering::Relaxed);
            })?;
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while spawned.load(Ordering::Relaxed) < 100 && Instant::now() < deadline {
            sleep(Duration::from_millis(10));
        }
        assert_eq!(spawned.load(Ordering::Relaxed), 100);
        Ok(())
    }
}
