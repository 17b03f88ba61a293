//! Concurrent fan-out over independent device jobs.
//!
//! Each job runs on its own scoped thread and reports back over a channel
//! tagged with its input position. The call returns only after every job has
//! finished, which is what gives sequence steps their barrier semantics.
use crossbeam_channel as xch;

/// Run `f` over every job concurrently and return the results in input order.
///
/// Zero or one job runs inline on the caller's thread.
pub fn fan_out<T, R, F>(jobs: Vec<T>, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if jobs.len() <= 1 {
        return jobs.into_iter().map(f).collect();
    }

    let n = jobs.len();
    let (tx, rx) = xch::bounded::<(usize, R)>(n);
    std::thread::scope(|s| {
        for (idx, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            let f = &f;
            s.spawn(move || {
                // The receiver outlives the scope; a send can only fail if the
                // caller is unwinding.
                let _ = tx.send((idx, f(job)));
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(n).collect();
    for (idx, r) in rx.try_iter() {
        slots[idx] = Some(r);
    }
    slots.into_iter().flatten().collect()
}
