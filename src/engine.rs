//! Scatter-gather over every account/region target.
//!
//! Each target is scanned by its own task: connect, list every stack page, match, then extract
//! the facet of each matched stack one after another. A semaphore bounds how many targets are
//! scanned at once. The merged records are sorted by account id, region and stack name; records
//! sharing all three keys keep their merge order, which depends on task completion order.

use std::cmp::Ordering as SortOrdering;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::facets::{FacetExtractor, ViewRecord};
use crate::matcher;
use crate::stacks::{self, Connector, RawStack, StackApi};
use crate::targets::Target;

pub const DEFAULT_CONCURRENCY: usize = 16;

/// When a finished run counts as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FailurePolicy {
    /// Every target failed to list its stacks.
    AllTargets,
    /// Any target or stack produced an error record.
    AnyError,
    Never,
}

#[derive(Debug)]
pub struct RunReport<F> {
    pub records: Vec<ViewRecord<F>>,
    pub targets: usize,
    pub failed_targets: usize,
    pub failed_stacks: usize,
}

impl<F> RunReport<F> {
    pub fn succeeded(&self, policy: FailurePolicy) -> bool {
        match policy {
            FailurePolicy::AllTargets => self.targets == 0 || self.failed_targets < self.targets,
            FailurePolicy::AnyError => self.failed_targets == 0 && self.failed_stacks == 0,
            FailurePolicy::Never => true,
        }
    }
}

struct UnitReport<F> {
    records: Vec<ViewRecord<F>>,
    listing_failed: bool,
}

impl<F> UnitReport<F> {
    fn failed(target: &Target, error: impl ToString) -> Self {
        Self {
            records: vec![ViewRecord::target_error(target, error)],
            listing_failed: true,
        }
    }
}

pub struct Engine {
    concurrency: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl Engine {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run<C, E>(
        &self,
        targets: Vec<Target>,
        connector: Arc<C>,
        extractor: Arc<E>,
    ) -> RunReport<E::Facet>
    where
        C: Connector,
        E: FacetExtractor,
    {
        let total = targets.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let completed = Arc::new(AtomicUsize::new(0));

        tracing::info!(
            facet = extractor.kind().name(),
            targets = total,
            concurrency = self.concurrency,
            "scanning targets"
        );

        let mut units = JoinSet::new();
        for (index, target) in targets.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let connector = connector.clone();
            let extractor = extractor.clone();

            units.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, UnitReport::failed(&target, "scheduler shut down")),
                };

                let span = tracing::info_span!(
                    "scan",
                    account_id = %target.account_id,
                    region = %target.region
                );
                let scanned = AssertUnwindSafe(scan_target(
                    connector.as_ref(),
                    extractor.as_ref(),
                    &target,
                ))
                .catch_unwind()
                .instrument(span)
                .await;

                let report = match scanned {
                    Ok(report) => report,
                    Err(_) => {
                        tracing::error!(
                            account_id = %target.account_id,
                            region = %target.region,
                            "scan panicked"
                        );
                        UnitReport::failed(&target, "scan aborted unexpectedly")
                    }
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    account_id = %target.account_id,
                    region = %target.region,
                    records = report.records.len(),
                    "{}/{} targets scanned",
                    done,
                    total
                );

                (index, report)
            });
        }

        let (mut records, failed_targets) = gather(units, &targets).await;
        sort_records(&mut records);

        let failed_stacks = records
            .iter()
            .filter(|record| record.is_error() && !record.stack_name.is_empty())
            .count();

        return RunReport {
            records,
            targets: total,
            failed_targets,
            failed_stacks,
        };
    }
}

/// Merges unit reports as they finish. A task that never reported back still gets a target
/// error record, so every target is represented in the result.
async fn gather<F: 'static>(
    mut units: JoinSet<(usize, UnitReport<F>)>,
    targets: &[Target],
) -> (Vec<ViewRecord<F>>, usize) {
    let mut records: Vec<ViewRecord<F>> = vec![];
    let mut failed_targets = 0;
    let mut reported = vec![false; targets.len()];

    while let Some(joined) = units.join_next().await {
        match joined {
            Ok((index, unit)) => {
                if let Some(seen) = reported.get_mut(index) {
                    *seen = true;
                }
                if unit.listing_failed {
                    failed_targets += 1;
                }
                records.extend(unit.records);
            }
            Err(error) => tracing::error!(error = %error, "scan task did not complete"),
        }
    }

    for (target, _) in targets.iter().zip(reported).filter(|(_, seen)| !seen) {
        tracing::error!(
            account_id = %target.account_id,
            region = %target.region,
            "no report from scan task"
        );
        records.push(ViewRecord::target_error(target, "scan task did not complete"));
        failed_targets += 1;
    }

    (records, failed_targets)
}

async fn scan_target<C, E>(connector: &C, extractor: &E, target: &Target) -> UnitReport<E::Facet>
where
    C: Connector,
    E: FacetExtractor,
{
    let api = match connector.connect(target).await {
        Ok(api) => api,
        Err(error) => {
            tracing::warn!(error = %error, "failed to create client");
            return UnitReport::failed(target, error);
        }
    };

    let stacks = match list_all_stacks(&api).await {
        Ok(stacks) => stacks,
        Err(error) => {
            tracing::warn!(error = %error, "failed to list stacks");
            return UnitReport::failed(target, error);
        }
    };

    let matched = matcher::match_stacks(stacks, &target.name_filter, &target.tag_filters);

    let mut records = Vec::with_capacity(matched.len());
    for stack in &matched {
        tracing::debug!(stack_name = %stack.name, "matched stack");
        records.push(extractor.view(&api, target, stack).await);
    }

    UnitReport {
        records,
        listing_failed: false,
    }
}

/// Follows continuation tokens until the last page. Any failed page fails the whole listing.
pub async fn list_all_stacks(api: &dyn StackApi) -> Result<Vec<RawStack>, stacks::Error> {
    let mut stacks: Vec<RawStack> = vec![];
    let mut next_token: Option<String> = None;
    let mut pages = 0;

    loop {
        let page = api.list_stacks(next_token.take()).await?;
        pages += 1;
        stacks.extend(page.stacks);

        match page.next_token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => break,
        }
    }

    tracing::debug!(pages, stacks = stacks.len(), "listed stacks");
    return Ok(stacks);
}

fn compare_records<F>(a: &ViewRecord<F>, b: &ViewRecord<F>) -> SortOrdering {
    a.account_id
        .cmp(&b.account_id)
        .then_with(|| a.region.cmp(&b.region))
        .then_with(|| a.stack_name.cmp(&b.stack_name))
}

fn sort_records<F>(records: &mut [ViewRecord<F>]) {
    records.sort_by(compare_records);
}
