use std::time::Instant;

use rsm_index::{IndexClient, IndexError, LostEntry, Record};
use rsm_registry::{RegistryClient, RegistryError};
use rsm_state::StateStore;

use crate::backoff::Backoff;
use crate::checkpoint::Checkpointer;
use crate::formatter::Formatter;
use crate::job::Job;
use crate::telemetry::Telemetry;

/// Successful outcomes of processing a single change (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessOutcome {
    Upserted,
    Skipped,
}

/// Failure classification (§4.F/§7). `Deleted` is raised rather than acted
/// on directly, so the wrapper can apply its uniform success/no-retry
/// policy without branching F's return signature (§9).
#[derive(Debug)]
enum ProcessFailure {
    Deleted,
    Transient(String),
}

/// The process-one-change pipeline (§4.F): fetch, format, upsert — or
/// classify why it couldn't.
async fn process_change<R, IC, FMT>(
    job: &Job,
    backoff: &Backoff,
    registry: &R,
    index: &IC,
    formatter: &FMT,
    telemetry: &dyn Telemetry,
) -> Result<ProcessOutcome, ProcessFailure>
where
    R: RegistryClient,
    IC: IndexClient,
    FMT: Formatter,
{
    telemetry.incr_counter("packages", 1);

    if job.change.is_heartbeat() {
        telemetry.report_error("process_change", "heartbeat leaked past queue entry");
        return Ok(ProcessOutcome::Skipped);
    }

    if job.retry > 0 {
        backoff.wait(job.retry).await;
    }

    if job.change.deleted {
        return Err(ProcessFailure::Deleted);
    }

    let Some(rev) = job.change.changes.first() else {
        return Ok(ProcessOutcome::Skipped);
    };

    let doc = match registry.get_doc(job.id(), &rev.rev).await {
        Ok(doc) => doc,
        Err(RegistryError::LookupFailure(_)) => return Err(ProcessFailure::Deleted),
        Err(RegistryError::Transport(err)) => {
            return Err(ProcessFailure::Transient(format!("fetch: {err:#}")));
        }
    };

    let Some(record) = formatter.format(&doc) else {
        return Ok(ProcessOutcome::Skipped);
    };

    index
        .upsert(record)
        .await
        .map_err(|err| ProcessFailure::Transient(format!("upsert: {err:#}")))?;

    Ok(ProcessOutcome::Upserted)
}

/// What the main loop needs to do to a completed job: nothing further
/// (success), re-queue at the front with an incremented retry, or move it
/// to the parked set. The main loop only ever touches queue/parked-set
/// state — everything I/O-shaped already happened inside [`run_job`].
pub(crate) enum JobCompletion {
    Done { id: String },
    Retry { job: Job },
    Parked { job: Job },
}

/// Runs the per-job wrapper (§4.D) around [`process_change`] (§4.F): deletes
/// on the `Deleted` classification, advances the checkpoint on a non-ignored
/// success, retries transient failures up to `retry_max`, and parks (with a
/// best-effort "lost" write) once exhausted.
///
/// All I/O here — registry fetch, index upsert/delete, checkpoint save,
/// lost-index write — runs against shared, thread-safe collaborator handles,
/// per §5; none of it touches the queue or parked set directly.
pub(crate) async fn run_job<R, IC, S, FMT>(
    job: Job,
    backoff: &Backoff,
    retry_max: u32,
    registry: &R,
    index: &IC,
    checkpointer: &Checkpointer<S>,
    formatter: &FMT,
    telemetry: &dyn Telemetry,
) -> JobCompletion
where
    R: RegistryClient,
    IC: IndexClient,
    S: StateStore,
    FMT: Formatter,
{
    let started_at = Instant::now();
    let ignore_seq = job.effective_ignore_seq();
    let id = job.id().to_string();

    let result = process_change(&job, backoff, registry, index, formatter, telemetry).await;

    let completion = match result {
        Ok(_outcome) => {
            if !ignore_seq {
                if let Err(err) = checkpointer.save_seq(job.change.seq).await {
                    telemetry.report_error("checkpoint", &format!("{err:#}"));
                }
            }
            JobCompletion::Done { id }
        }
        Err(ProcessFailure::Deleted) => {
            if let Err(err) = index.delete(job.id()).await {
                telemetry.report_error("index delete", &format!("{err:#}"));
            }
            if !ignore_seq {
                if let Err(err) = checkpointer.save_seq(job.change.seq).await {
                    telemetry.report_error("checkpoint", &format!("{err:#}"));
                }
            }
            JobCompletion::Done { id }
        }
        Err(ProcessFailure::Transient(message)) => {
            telemetry.report_error("process_change", &message);
            let job = job.retried();
            if job.retry <= retry_max {
                JobCompletion::Retry { job }
            } else {
                best_effort_write_lost(index, &job, &message).await;
                JobCompletion::Parked { job }
            }
        }
    };

    if !ignore_seq {
        telemetry.record_duration("process_change", started_at.elapsed());
    }

    completion
}

async fn best_effort_write_lost<IC: IndexClient>(index: &IC, job: &Job, error: &str) {
    let entry = LostEntry {
        id: job.id().to_string(),
        seq: job.change.seq,
        retry: job.retry,
        error: error.to_string(),
    };
    // Secondary failure is logged by the caller's telemetry only in the
    // CLI layer; writes here are intentionally not retried (§9).
    let _: Result<(), IndexError> = index.upsert_lost(entry).await;
}
