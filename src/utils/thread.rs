use std::thread;

const MAX_TASKS: usize = 512;

/// Fans `nb_iterations` out over contiguous, near-equal `[start, end)` ranges
/// and joins all workers before returning. `max_tasks` caps the number of
/// worker threads; it defaults to the machine's available parallelism and is
/// clamped to `[1, 512]`.
pub fn execute<F>(nb_iterations: usize, work: F, max_tasks: Option<usize>)
where
    F: Fn(usize, usize) + Sync,
{
    if nb_iterations == 0 {
        return;
    }

    let mut nb_tasks = max_tasks
        .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
        .clamp(1, MAX_TASKS);

    if nb_tasks == 1 {
        work(0, nb_iterations);
        return;
    }

    let mut iterations_per_task = nb_iterations / nb_tasks;
    if iterations_per_task < 1 {
        iterations_per_task = 1;
        nb_tasks = nb_iterations;
    }

    let mut extra_tasks = nb_iterations - nb_tasks * iterations_per_task;
    let mut offset = 0;

    thread::scope(|s| {
        let work = &work;
        for _ in 0..nb_tasks {
            let start = offset;
            let mut end = start + iterations_per_task;
            if extra_tasks > 0 {
                end += 1;
                extra_tasks -= 1;
            }
            offset = end;
            s.spawn(move || work(start, end));
        }
    });
}
