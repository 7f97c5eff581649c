//! Bounded worker pool for batch skill operations (§4.F, §5).
//!
//! Built on `crossbeam-channel` (already a teacher dependency) as a bounded
//! work queue, rather than an unbounded thread-per-item fan-out — batch
//! operations here can span hundreds of skills, so a real bound matters.

use crossbeam_channel::bounded;

/// Run `f` over every item in `items` using up to `workers` threads,
/// collecting one result per item in the original order. Each item's
/// closure is responsible for catching and logging its own errors: a
/// panicking or erroring item must never stop its siblings.
pub fn run<T, R, F>(items: Vec<T>, workers: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send + Default,
    F: Fn(T) -> R + Send + Sync,
{
    let n = items.len();
    if n == 0 {
        return Vec::new();
    }
    let workers = workers.clamp(1, n);

    let (job_tx, job_rx) = bounded::<(usize, T)>(n);
    let (res_tx, res_rx) = bounded::<(usize, R)>(n);
    for (i, item) in items.into_iter().enumerate() {
        job_tx.send((i, item)).expect("job channel is open");
    }
    drop(job_tx);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            let f = &f;
            scope.spawn(move || {
                while let Ok((i, item)) = job_rx.recv() {
                    let _ = res_tx.send((i, f(item)));
                }
            });
        }
        drop(res_tx);

        let mut out: Vec<R> = (0..n).map(|_| R::default()).collect();
        for (i, result) in res_rx.iter() {
            out[i] = result;
        }
        out
    })
}
