//! Drives the engine over every locus of the genome.
//!
//! For each locus, one worker per condition pulls the next combined bundle
//! from that condition's factory and estimates its abundances. Workers run on
//! tokio's blocking pool, at most `num_threads` at a time, and each owns its
//! factory for the duration of the task: the factory is moved into the task
//! and handed back with the result. Once every worker of the locus has
//! finished, the samples are tested against each other and recorded for
//! tracking. Multiple testing correction runs after the last locus.

use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tokio::sync::OwnedSemaphorePermit;
use tokio::sync::Semaphore;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::abundances::AbundanceEstimator;
use crate::abundances::SampleAbundances;
use crate::bundles::factory::CombinedBundle;
use crate::bundles::factory::ReplicatedBundleFactory;
use crate::bundles::factory::SynchronizeError;
use crate::bundles::RefSequenceTable;
use crate::differential::correction::BenjaminiHochberg;
use crate::differential::kernel::StatisticalKernel;
use crate::differential::test_differential;
use crate::differential::Tests;
use crate::tracking::Tracking;
use crate::utils::display::LocusCounter;

//=========//
// Options //
//=========//

/// Options for a differential run.
#[derive(Clone, Debug)]
pub struct DiffOptions {
    /// Maximum number of workers running at once.
    pub num_threads: usize,

    /// Minimum normalized fragment count for a locus to be tested.
    pub min_read_count: f64,

    /// False discovery rate for calling significance.
    pub fdr: f64,

    /// Compare only consecutive samples instead of every pair.
    pub samples_are_time_series: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        DiffOptions {
            num_threads: 1,
            min_read_count: 10.0,
            fdr: 0.05,
            samples_are_time_series: false,
        }
    }
}

//===========//
// Task Gate //
//===========//

/// Counting gate that bounds how many workers run at once. A permit is
/// returned to the gate when it is dropped.
#[derive(Clone, Debug)]
pub struct TaskGate {
    semaphore: Arc<Semaphore>,
}

impl TaskGate {
    /// Creates a gate admitting `permits` workers at once (at least one).
    pub fn new(permits: usize) -> Self {
        TaskGate {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> anyhow::Result<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .with_context(|| "acquiring a worker slot")
    }

    /// The number of free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

//===============//
// Sample Worker //
//===============//

/// What one worker produced for one locus.
#[derive(Debug)]
pub struct SampleOutcome {
    /// Tag of the locus, if the factory yielded one.
    pub locus_tag: Option<String>,

    /// The sample's abundances; unusable if estimation was not possible.
    pub abundances: SampleAbundances,

    /// Whether the locus had any scaffolds or hits.
    pub non_empty: bool,

    /// Whether the factory yielded a locus at all.
    pub has_more: bool,
}

/// Pulls the next locus from `factory` and estimates its abundances.
///
/// The factory is always handed back. Synchronization errors are returned;
/// estimation errors only make the sample unusable for this locus.
pub fn sample_worker(
    ref_table: &RefSequenceTable,
    mut factory: ReplicatedBundleFactory,
    estimator: &dyn AbundanceEstimator,
) -> (
    ReplicatedBundleFactory,
    Result<SampleOutcome, SynchronizeError>,
) {
    let mut bundle = CombinedBundle::default();

    match factory.next_bundle(&mut bundle) {
        Ok(true) => {}
        Ok(false) => {
            let outcome = SampleOutcome {
                locus_tag: None,
                abundances: SampleAbundances::unusable(""),
                non_empty: false,
                has_more: false,
            };
            return (factory, Ok(outcome));
        }
        Err(err) => return (factory, Err(err)),
    }

    let locus_tag = bundle.span.tag(ref_table);
    let non_empty = !bundle.ref_scaffolds.is_empty() || !bundle.hits.is_empty();

    let abundances = match bundle.num_non_empty() {
        0 => SampleAbundances::unusable(&locus_tag),
        _ => match estimator.estimate(&locus_tag, &bundle) {
            Ok(a) => a,
            Err(err) => {
                warn!("{}: estimation failed: {}", locus_tag, err);
                SampleAbundances::unusable(&locus_tag)
            }
        },
    };

    let outcome = SampleOutcome {
        locus_tag: Some(locus_tag),
        abundances,
        non_empty,
        has_more: true,
    };
    (factory, Ok(outcome))
}

//========//
// Driver //
//========//

/// Everything a run produces.
#[derive(Debug, Default)]
pub struct DiffResults {
    /// Every test, corrected for multiple testing.
    pub tests: Tests,

    /// The FPKM tracking tables.
    pub tracking: Tracking,

    /// Loci pulled from the factories.
    pub loci_processed: usize,

    /// Loci that were tested.
    pub loci_tested: usize,
}

/// Runs the engine over every locus.
pub struct Driver {
    ref_table: Arc<RefSequenceTable>,
    estimator: Arc<dyn AbundanceEstimator>,
    kernel: Arc<dyn StatisticalKernel>,
    options: DiffOptions,
}

impl Driver {
    /// Creates a driver.
    pub fn new(
        ref_table: Arc<RefSequenceTable>,
        estimator: Arc<dyn AbundanceEstimator>,
        kernel: Arc<dyn StatisticalKernel>,
        options: DiffOptions,
    ) -> Self {
        Driver {
            ref_table,
            estimator,
            kernel,
            options,
        }
    }

    /// Processes every locus of the given conditions, in order. The factories
    /// are handed back, exhausted, alongside the results.
    pub async fn run(
        &self,
        mut factories: Vec<ReplicatedBundleFactory>,
    ) -> anyhow::Result<(Vec<ReplicatedBundleFactory>, DiffResults)> {
        let gate = TaskGate::new(self.options.num_threads);
        let total = factories.iter().map(|f| f.num_bundles()).max();
        let mut counter = LocusCounter::new(total, None);
        let mut results = DiffResults::default();

        info!(
            "Testing {} conditions with {} worker(s).",
            factories.len(),
            self.options.num_threads.max(1)
        );

        loop {
            // (1) Fan out one worker per condition.
            let tasks = factories.drain(..).map(|factory| {
                let gate = gate.clone();
                let ref_table = Arc::clone(&self.ref_table);
                let estimator = Arc::clone(&self.estimator);

                async move {
                    let _permit = gate.acquire().await?;
                    tokio::task::spawn_blocking(move || {
                        sample_worker(&ref_table, factory, estimator.as_ref())
                    })
                    .await
                    .with_context(|| "joining a sample worker")
                }
            });

            // (2) Wait for every worker of this locus.
            let finished = join_all(tasks).await;

            let mut samples = Vec::with_capacity(finished.len());
            let mut locus_tag: Option<String> = None;
            let mut has_more = false;
            let mut non_empty = false;

            for (i, result) in finished.into_iter().enumerate() {
                let (factory, outcome) = result?;
                factories.push(factory);

                let outcome = outcome.with_context(|| format!("synchronizing condition {}", i))?;
                has_more |= outcome.has_more;
                non_empty |= outcome.non_empty;

                match (&locus_tag, &outcome.locus_tag) {
                    (None, Some(tag)) => locus_tag = Some(tag.clone()),
                    (Some(expected), Some(tag)) if expected != tag => warn!(
                        "condition {} is at locus {} while others are at {}",
                        i, tag, expected
                    ),
                    _ => {}
                }

                samples.push(outcome.abundances);
            }

            if !has_more {
                break;
            }

            results.loci_processed += 1;
            counter.inc();

            if !non_empty {
                continue;
            }

            // (3) Test and track.
            let locus_tag = locus_tag.unwrap_or_default();
            debug!("testing locus {}", locus_tag);
            test_differential(
                &locus_tag,
                &samples,
                &mut results.tests,
                &mut results.tracking,
                self.options.samples_are_time_series,
                self.kernel.as_ref(),
            );
            results.loci_tested += 1;
        }

        counter.report();

        let correction = BenjaminiHochberg {
            fdr: self.options.fdr,
        };
        results.tests.correct(&correction);

        info!(
            "Tested {} of {} loci.",
            results.loci_tested, results.loci_processed
        );
        Ok((factories, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abundances::ReplicateCountEstimator;
    use crate::bundles::testing::scaffold;
    use crate::bundles::testing::VecProducer;
    use crate::bundles::HitBundle;
    use crate::bundles::LocusSpan;
    use crate::bundles::ReadHit;
    use crate::differential::kernel::LogRatioKernel;
    use crate::differential::TestStatus;

    fn locus(left: u64, hits: usize) -> HitBundle {
        HitBundle {
            span: LocusSpan {
                reference_id: 0,
                left,
                right: left + 1_000,
            },
            ref_scaffolds: vec![scaffold(&format!("t{}", left), "g", left)],
            hits: (0..hits)
                .map(|i| ReadHit {
                    reference: String::from("chr1"),
                    left: left + i as u64,
                    right: left + i as u64 + 100,
                    transcript_id: None,
                    mass: 1.0,
                    replicate: 0,
                })
                .collect(),
        }
    }

    /// Two replicates; the second has a fifth more fragments at every locus.
    fn condition(hits: &[usize]) -> ReplicatedBundleFactory {
        let replicate = |extra: usize| -> Vec<HitBundle> {
            hits.iter()
                .enumerate()
                .map(|(i, h)| locus(i as u64 * 10_000, h + h * extra / 5))
                .collect()
        };

        ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(replicate(0))),
            Box::new(VecProducer::new(replicate(1))),
        ])
    }

    fn three_conditions() -> Vec<ReplicatedBundleFactory> {
        vec![
            condition(&[50, 50, 0]),
            condition(&[50, 400, 0]),
            condition(&[60, 20, 0]),
        ]
    }

    fn driver(num_threads: usize) -> Driver {
        let mut table = RefSequenceTable::default();
        table.get_or_insert("chr1");

        Driver::new(
            Arc::new(table),
            Arc::new(ReplicateCountEstimator::default()),
            Arc::new(LogRatioKernel),
            DiffOptions {
                num_threads,
                ..Default::default()
            },
        )
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    pub fn test_task_gate() {
        let rt = runtime();
        let gate = TaskGate::new(2);
        rt.block_on(async {
            let first = gate.acquire().await.unwrap();
            let _second = gate.acquire().await.unwrap();
            assert_eq!(gate.available(), 0);
            drop(first);
            assert_eq!(gate.available(), 1);
        });

        assert_eq!(TaskGate::new(0).available(), 1);
    }

    #[test]
    pub fn test_sample_worker_returns_the_factory() {
        let mut table = RefSequenceTable::default();
        table.get_or_insert("chr1");
        let estimator = ReplicateCountEstimator::default();

        let factory = condition(&[50]);
        let (factory, outcome) = sample_worker(&table, factory, &estimator);
        let outcome = outcome.unwrap();
        assert!(outcome.has_more);
        assert!(outcome.non_empty);
        assert!(outcome.abundances.usable);
        assert_eq!(outcome.locus_tag.as_deref(), Some("chr1:0-1000"));

        let (_, outcome) = sample_worker(&table, factory, &estimator);
        assert!(!outcome.unwrap().has_more);
    }

    #[test]
    pub fn test_sample_worker_reports_synchronization_errors() {
        let table = RefSequenceTable::default();
        let mut other = locus(0, 1);
        other.ref_scaffolds[0].transcript_id = String::from("elsewhere");

        let factory = ReplicatedBundleFactory::new(vec![
            Box::new(VecProducer::new(vec![locus(0, 1)])),
            Box::new(VecProducer::new(vec![other])),
        ]);

        let (_, outcome) = sample_worker(&table, factory, &ReplicateCountEstimator::default());
        assert!(outcome.is_err());
    }

    #[test]
    pub fn test_driver_tests_every_locus() {
        let rt = runtime();

        for num_threads in [1, 4] {
            let (factories, results) = rt
                .block_on(driver(num_threads).run(three_conditions()))
                .unwrap();

            assert_eq!(factories.len(), 3);
            assert_eq!(results.loci_processed, 3);
            assert_eq!(results.loci_tested, 3);
            assert_eq!(results.tests.isoform_de_tests.len(), 3);
            assert_eq!(results.tests.isoform_de_tests[0].len(), 3);

            // The third locus has no fragments in any condition.
            let empty = &results.tests.gene_de_tests[2][0]["g"];
            assert_eq!(empty.test_status, TestStatus::NoTest);

            let changed = &results.tests.isoform_de_tests[1][0]["t10000"];
            assert_eq!(changed.test_status, TestStatus::Ok);
            assert!(changed.differential > 0.0);
            assert!(changed.p_value < 0.05);

            let tracked = &results.tracking.isoform_fpkm_tracking["t0"];
            assert_eq!(tracked.fpkm_series.len(), 3);
        }
    }

    #[test]
    pub fn test_time_series_compares_consecutive_conditions() {
        let rt = runtime();
        let mut d = driver(2);
        d.options.samples_are_time_series = true;

        let factories = vec![
            condition(&[50]),
            condition(&[60]),
            condition(&[70]),
            condition(&[80]),
        ];
        let (_, results) = rt.block_on(d.run(factories)).unwrap();
        assert_eq!(results.tests.isoform_de_tests[0].len(), 3);
    }
}
