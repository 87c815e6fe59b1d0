use crate::budget::{mb_to_bytes, BucketSnapshot, BudgetStatus, DailyBucket};
use crate::config::{BudgetConfig, SiteProfile};
use crate::flow::TransportStep;
use crate::lock;
use crate::residential::{BurstSnapshot, ResidentialBurstController};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Composes global, global-residential and per-site daily buckets
///
/// Every bucket sits behind its own mutex; the site maps are fixed at
/// construction so lookups need no outer lock.
pub struct TrafficBudgetManager {
    global: Mutex<DailyBucket>,
    global_residential: Mutex<DailyBucket>,
    sites: HashMap<String, Mutex<DailyBucket>>,
    residential_sites: HashMap<String, Mutex<DailyBucket>>,
    residential_tracker: Option<Arc<ResidentialBurstController>>,
}

/// Observability view of every budget
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub global: BucketSnapshot,
    pub global_residential: BucketSnapshot,
    pub sites: BTreeMap<String, BucketSnapshot>,
    pub residential_sites: BTreeMap<String, BucketSnapshot>,
    pub residential_bursts: BTreeMap<String, BurstSnapshot>,
}

impl TrafficBudgetManager {
    /// Builds all buckets from configuration
    ///
    /// Sites with a `residential-mb-per-day` get a residential bucket, and the
    /// same limit is wired into `residential_tracker` as the domain's cap.
    pub fn new(
        config: &BudgetConfig,
        sites: &[SiteProfile],
        residential_tracker: Option<Arc<ResidentialBurstController>>,
        now: DateTime<Utc>,
    ) -> Self {
        let ratio = config.throttle_ratio;

        let global = DailyBucket::new(
            "global",
            mb_to_bytes(config.global_soft_mb_per_day),
            mb_to_bytes(config.global_hard_mb_per_day),
            ratio,
            now,
        );
        let global_residential = DailyBucket::new(
            "global_residential",
            mb_to_bytes(config.residential_soft_mb_per_day),
            mb_to_bytes(config.residential_hard_mb_per_day),
            ratio,
            now,
        );

        let mut site_buckets = HashMap::new();
        let mut residential_buckets = HashMap::new();

        for site in sites {
            site_buckets.insert(
                site.domain.clone(),
                Mutex::new(DailyBucket::new(
                    site.domain.clone(),
                    mb_to_bytes(site.budget.soft_mb_per_day),
                    mb_to_bytes(site.budget.hard_mb_per_day),
                    ratio,
                    now,
                )),
            );

            if let Some(residential_mb) = site.budget.residential_mb_per_day {
                let limit = mb_to_bytes(residential_mb);
                residential_buckets.insert(
                    site.domain.clone(),
                    Mutex::new(DailyBucket::new(
                        format!("{} residential", site.domain),
                        limit,
                        limit,
                        ratio,
                        now,
                    )),
                );

                if let Some(tracker) = &residential_tracker {
                    tracker.set_domain_limit(&site.domain, limit);
                }
            }
        }

        Self {
            global: Mutex::new(global),
            global_residential: Mutex::new(global_residential),
            sites: site_buckets,
            residential_sites: residential_buckets,
            residential_tracker,
        }
    }

    /// Charges `bytes_used` for `site` fetched over `proxy_type`
    ///
    /// The global bucket and the site bucket are always charged; residential
    /// traffic is also charged to the residential buckets and the merged verdict
    /// is pushed to the residential tracker.
    pub fn consume(
        &self,
        site: &str,
        bytes_used: u64,
        proxy_type: TransportStep,
        now: DateTime<Utc>,
    ) -> BudgetStatus {
        let mut statuses = vec![lock(&self.global).consume(bytes_used, now)];

        if let Some(bucket) = self.sites.get(site) {
            statuses.push(lock(bucket).consume(bytes_used, now));
        }

        let residential = proxy_type.is_residential();
        if residential {
            statuses.push(lock(&self.global_residential).consume(bytes_used, now));
            if let Some(bucket) = self.residential_sites.get(site) {
                statuses.push(lock(bucket).consume(bytes_used, now));
            }
        }

        let merged = BudgetStatus::merge_all(statuses);

        if merged.blocked {
            tracing::warn!(
                site,
                proxy_type = %proxy_type,
                reason = merged.reason.as_deref().unwrap_or(""),
                "Traffic budget blocked"
            );
        } else if merged.should_throttle {
            tracing::debug!(
                site,
                proxy_type = %proxy_type,
                usage_ratio = merged.usage_ratio,
                "Traffic budget advises throttling"
            );
        }

        if residential {
            if let Some(tracker) = &self.residential_tracker {
                tracker.update_budget_status(site, merged.clone(), now);
            }
        }

        merged
    }

    pub fn residential_tracker(&self) -> Option<&Arc<ResidentialBurstController>> {
        self.residential_tracker.as_ref()
    }

    /// Captures usage of every bucket and every tracked residential domain
    pub fn snapshot(&self, now: DateTime<Utc>) -> BudgetSnapshot {
        let collect = |buckets: &HashMap<String, Mutex<DailyBucket>>| {
            buckets
                .iter()
                .map(|(domain, bucket)| (domain.clone(), lock(bucket).snapshot(now)))
                .collect::<BTreeMap<_, _>>()
        };

        BudgetSnapshot {
            global: lock(&self.global).snapshot(now),
            global_residential: lock(&self.global_residential).snapshot(now),
            sites: collect(&self.sites),
            residential_sites: collect(&self.residential_sites),
            residential_bursts: self
                .residential_tracker
                .as_ref()
                .map(|tracker| tracker.snapshot_all(now))
                .unwrap_or_default(),
        }
    }
}
