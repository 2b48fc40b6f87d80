use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use filecache::caching::FileCache;
use filecache::config::Config;
use filecache::files::CachedFile;

use crate::workloads::{WorkloadsConfig, prepare_workload, process_request};

pub async fn perform_stresstest(
    config: Config,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // create one cache per distinct cache name
    let mut caches: BTreeMap<String, Arc<FileCache<CachedFile>>> = BTreeMap::new();
    for workload in &workloads.workloads {
        if !caches.contains_key(&workload.cache) {
            let cache = FileCache::new(workload.cache.clone(), config.cache(&workload.cache))
                .context("failed to create file cache")?;
            caches.insert(workload.cache.clone(), Arc::new(cache));
        }
    }

    // initialize workloads
    let mut prepared = Vec::with_capacity(workloads.workloads.len());
    for workload in &workloads.workloads {
        let cache = Arc::clone(&caches[&workload.cache]);
        let payload = prepare_workload(workload)?;
        prepared.push((workload.concurrency, cache, Arc::new(payload)));
    }
    let cancel = CancellationToken::new();

    // warmup: run each workload once to make sure caches are warm
    {
        let start = Instant::now();

        let futures = prepared.iter().map(|(_, cache, workload)| {
            let cache = Arc::clone(cache);
            let workload = Arc::clone(workload);
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || process_request(&cache, &workload, &cancel))
        });

        for result in futures::future::join_all(futures).await {
            result.context("warmup request panicked")??;
        }

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(prepared.len());
    for (concurrency, cache, workload) in prepared.into_iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let errors = Arc::new(Mutex::new(0usize));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let cache = Arc::clone(&cache);
                        let workload = Arc::clone(&workload);
                        let task_durations = Arc::clone(&task_durations);
                        let errors = Arc::clone(&errors);
                        let cancel = cancel.clone();
                        let task_start = Instant::now();

                        tokio::task::spawn_blocking(move || {
                            match process_request(&cache, &workload, &cancel) {
                                Ok(()) => task_durations.lock().unwrap().add(task_start.elapsed().as_secs_f64()),
                                Err(error) => {
                                    tracing::error!(error = %error, "Request failed");
                                    *errors.lock().unwrap() += 1;
                                }
                            }

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let task_durations: DDSketch = {
                let mut task_durations = task_durations.lock().unwrap();
                std::mem::take(&mut *task_durations)
            };
            let errors = *errors.lock().unwrap();

            (concurrency, task_durations, errors)
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, task_durations, errors) = task.context("workload panicked")?;

        let ops = task_durations.count();
        let ops_ps = ops as f32 / duration.as_secs_f32();
        println!(
            "Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s, {errors} errors"
        );
        if ops == 0 {
            continue;
        }

        let quantile = |q| {
            let secs = task_durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(task_durations.sum().unwrap_or_default() / ops as f64);
        let p50 = quantile(0.5);
        let p90 = quantile(0.9);
        let p99 = quantile(0.99);
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
    }

    println!();
    for cache in caches.values() {
        print!("{}", cache.show_stats());
        cache.shutdown();
    }

    Ok(())
}
