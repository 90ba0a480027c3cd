//! Per-address credit ledger with ban and whitelist semantics.
//!
//! Every admitted call debits credits from the caller's [`RateEntry`]; a
//! periodic [`RateLimiter::replenish`] tick tops entries back up and drops
//! idle ones. Entries live in a [`DashMap`], so charging distinct
//! addresses never contends on a shared lock.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::clock::{self, Clock, SystemClock};
use crate::config::RateLimitSettings;

/// Abstract unit of request cost.
pub type Credit = u64;

/// Ledger entry for one source address.
///
/// Invariant: `0 <= credits <= max_credits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateEntry {
    credits: Credit,
    max_credits: Credit,
    banned_until: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
}

impl RateEntry {
    fn new(initial: Credit, max: Credit, now: DateTime<Utc>) -> Self {
        Self {
            credits: initial.min(max),
            max_credits: max,
            banned_until: None,
            last_activity: now,
        }
    }

    /// Current credit balance.
    #[must_use]
    pub const fn credits(&self) -> Credit {
        self.credits
    }

    /// Time of the last successful charge.
    #[must_use]
    pub const fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Returns `true` while a ban is in effect.
    #[must_use]
    pub fn is_banned(&self, now: DateTime<Utc>) -> bool {
        self.banned_until.is_some_and(|until| until > now)
    }

    fn pay_if_possible(&mut self, cost: Credit, now: DateTime<Utc>) -> bool {
        if cost > self.credits {
            return false;
        }
        self.credits -= cost;
        self.last_activity = now;
        true
    }

    fn add_credits(&mut self, credits: Credit) {
        self.credits = self.credits.saturating_add(credits).min(self.max_credits);
    }
}

/// Snapshot of one ledger entry, for administration views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressInfo {
    /// Source address.
    pub address: IpAddr,
    /// Current credit balance.
    pub credits: Credit,
    /// Time of the last successful charge.
    pub last_activity: DateTime<Utc>,
    /// Ban expiry, present only while the ban is in effect.
    pub banned_until: Option<DateTime<Utc>>,
}

/// Credit-based admission control keyed by source address.
#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    entries: DashMap<IpAddr, RateEntry>,
    whitelist: DashSet<IpAddr>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter on the system clock.
    #[must_use]
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Creates a limiter reading time from `clock`.
    #[must_use]
    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        let whitelist = settings.whitelist.iter().copied().collect();
        Self {
            settings,
            entries: DashMap::new(),
            whitelist,
            clock,
        }
    }

    /// Returns the configured tunables.
    #[must_use]
    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Returns a copy of the whitelist.
    #[must_use]
    pub fn whitelist(&self) -> Vec<IpAddr> {
        self.whitelist.iter().map(|ip| *ip).collect()
    }

    /// Exempts an address from accounting.
    pub fn add_to_whitelist(&self, address: IpAddr) {
        self.whitelist.insert(address);
    }

    /// Puts an address back under accounting.
    pub fn remove_from_whitelist(&self, address: IpAddr) {
        self.whitelist.remove(&address);
    }

    /// Returns `true` if the address bypasses the ledger.
    #[must_use]
    pub fn is_whitelisted(&self, address: IpAddr) -> bool {
        self.whitelist.contains(&address)
    }

    /// Charges the default request cost.
    #[must_use]
    pub fn can_perform_request(&self, address: IpAddr) -> bool {
        self.can_perform_request_with_cost(address, self.settings.request_cost)
    }

    /// Charges `cost` credits, returning `false` when the address is banned
    /// or cannot afford it. Whitelisted addresses always pass for free.
    #[must_use]
    pub fn can_perform_request_with_cost(&self, address: IpAddr, cost: Credit) -> bool {
        if self.is_whitelisted(address) {
            return true;
        }
        let now = self.clock.now();
        let mut entry = self.entry(address, now);
        if entry.is_banned(now) {
            return false;
        }
        entry.pay_if_possible(cost, now)
    }

    /// Bans an address for the configured ban period.
    pub fn ban(&self, address: IpAddr) {
        let now = self.clock.now();
        let until = clock::add_saturating(now, self.settings.ban_period);
        self.entry(address, now).banned_until = Some(until);
        tracing::info!(%address, %until, "address banned");
    }

    /// Lifts a ban.
    pub fn unban(&self, address: IpAddr) {
        let now = self.clock.now();
        self.entry(address, now).banned_until = None;
        tracing::info!(%address, "address unbanned");
    }

    /// Adds the configured credit addon to every non-banned entry and drops
    /// entries that sit at max credits and have been idle longer than the
    /// inactivity window.
    pub fn replenish(&self) {
        let now = self.clock.now();
        let addon = self.settings.credit_addon;
        let max = self.settings.max_credit;
        let inactive = self.settings.inactive_time;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            if entry.credits >= max && clock::is_elapsed(entry.last_activity, inactive, now) {
                return false;
            }
            if !entry.is_banned(now) {
                entry.add_credits(addon);
            }
            true
        });
        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            tracing::debug!(evicted, "dropped idle rate-limit entries");
        }
    }

    /// Returns a snapshot of every ledger entry.
    #[must_use]
    pub fn address_list(&self) -> Vec<AddressInfo> {
        let now = self.clock.now();
        self.entries
            .iter()
            .map(|item| {
                let entry = item.value();
                AddressInfo {
                    address: *item.key(),
                    credits: entry.credits,
                    last_activity: entry.last_activity,
                    banned_until: entry.banned_until.filter(|until| *until > now),
                }
            })
            .collect()
    }

    /// Returns the current balance of an address, if it has an entry.
    #[must_use]
    pub fn credits(&self, address: IpAddr) -> Option<Credit> {
        self.entries.get(&address).map(|entry| entry.credits)
    }

    /// Returns the number of ledger entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the ledger holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawns the periodic replenish task.
    pub fn spawn_replenisher(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = self.settings.addon_interval.max(std::time::Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.replenish();
            }
        })
    }

    fn entry(
        &self,
        address: IpAddr,
        now: DateTime<Utc>,
    ) -> dashmap::mapref::one::RefMut<'_, IpAddr, RateEntry> {
        self.entries.entry(address).or_insert_with(|| {
            RateEntry::new(self.settings.initial_credit, self.settings.max_credit, now)
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::*;
    use crate::domain::clock::ManualClock;

    fn settings() -> RateLimitSettings {
        RateLimitSettings {
            initial_credit: 5,
            max_credit: 10,
            credit_addon: 3,
            addon_interval: Duration::from_secs(1),
            request_cost: 2,
            ban_period: Duration::from_secs(60),
            inactive_time: Duration::from_secs(300),
            whitelist: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
    }

    fn limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let clock_dyn: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        (RateLimiter::with_clock(settings(), clock_dyn), clock)
    }

    #[test]
    fn credits_drain_then_reject() {
        let (limiter, _) = limiter();
        let ip = addr(1);
        assert!(limiter.can_perform_request(ip));
        assert_eq!(limiter.credits(ip), Some(3));
        assert!(limiter.can_perform_request(ip));
        assert_eq!(limiter.credits(ip), Some(1));
        assert!(!limiter.can_perform_request(ip));
        assert!(!limiter.can_perform_request(ip));
        assert_eq!(limiter.credits(ip), Some(1));
    }

    #[test]
    fn three_calls_then_fourth_fails_then_replenish() {
        let (limiter, _) = limiter();
        let ip = addr(2);
        // 5 -> 3 -> 1, then 1 < 2.
        assert!(limiter.can_perform_request(ip));
        assert!(limiter.can_perform_request(ip));
        assert!(!limiter.can_perform_request(ip));
        limiter.replenish();
        assert_eq!(limiter.credits(ip), Some(4));
        assert!(limiter.can_perform_request(ip));
        assert_eq!(limiter.credits(ip), Some(2));
    }

    #[test]
    fn replenish_caps_at_max() {
        let (limiter, _) = limiter();
        let ip = addr(3);
        assert!(limiter.can_perform_request_with_cost(ip, 0));
        for _ in 0..5 {
            limiter.replenish();
        }
        assert_eq!(limiter.credits(ip), Some(10));
    }

    #[test]
    fn ban_blocks_until_unban() {
        let (limiter, _) = limiter();
        let ip = addr(4);
        limiter.ban(ip);
        assert!(!limiter.can_perform_request(ip));
        limiter.unban(ip);
        assert!(limiter.can_perform_request(ip));
    }

    #[test]
    fn ban_expires_with_time() {
        let (limiter, clock) = limiter();
        let ip = addr(5);
        limiter.ban(ip);
        clock.advance(Duration::from_secs(59));
        assert!(!limiter.can_perform_request(ip));
        clock.advance(Duration::from_secs(2));
        assert!(limiter.can_perform_request(ip));
    }

    #[test]
    fn banned_entries_are_not_replenished() {
        let (limiter, _) = limiter();
        let ip = addr(6);
        assert!(limiter.can_perform_request(ip));
        limiter.ban(ip);
        limiter.replenish();
        assert_eq!(limiter.credits(ip), Some(3));
    }

    #[test]
    fn whitelisted_addresses_are_never_materialized() {
        let (limiter, _) = limiter();
        let local = IpAddr::V4(Ipv4Addr::LOCALHOST);
        for _ in 0..50 {
            assert!(limiter.can_perform_request(local));
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn whitelist_is_mutable_at_runtime() {
        let (limiter, _) = limiter();
        let ip = addr(7);
        limiter.add_to_whitelist(ip);
        for _ in 0..10 {
            assert!(limiter.can_perform_request(ip));
        }
        assert_eq!(limiter.len(), 0);
        limiter.remove_from_whitelist(ip);
        assert!(limiter.can_perform_request(ip));
        assert_eq!(limiter.len(), 1);
        assert!(!limiter.whitelist().contains(&ip));
    }

    #[test]
    fn idle_full_entries_are_evicted() {
        let (limiter, clock) = limiter();
        let ip = addr(8);
        assert!(limiter.can_perform_request(ip));
        // Climb back to max credits.
        limiter.replenish();
        limiter.replenish();
        assert_eq!(limiter.credits(ip), Some(9));
        limiter.replenish();
        assert_eq!(limiter.credits(ip), Some(10));
        clock.advance(Duration::from_secs(301));
        limiter.replenish();
        assert!(limiter.is_empty());
    }

    #[test]
    fn active_or_partial_entries_survive_sweep() {
        let (limiter, clock) = limiter();
        let ip = addr(9);
        assert!(limiter.can_perform_request(ip));
        clock.advance(Duration::from_secs(301));
        // Below max credits: kept and topped up.
        limiter.replenish();
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.credits(ip), Some(6));
    }

    #[test]
    fn address_list_reports_active_bans_only() {
        let (limiter, clock) = limiter();
        let ip = addr(10);
        limiter.ban(ip);
        let list = limiter.address_list();
        let Some(info) = list.first() else {
            panic!("expected an entry");
        };
        assert_eq!(info.address, ip);
        assert!(info.banned_until.is_some());
        clock.advance(Duration::from_secs(120));
        let list = limiter.address_list();
        let Some(info) = list.first() else {
            panic!("expected an entry");
        };
        assert!(info.banned_until.is_none());
    }

    #[tokio::test]
    async fn concurrent_charges_never_overdraw() {
        let limiter = Arc::new(RateLimiter::new(RateLimitSettings {
            initial_credit: 100,
            max_credit: 100,
            request_cost: 1,
            whitelist: Vec::new(),
            ..RateLimitSettings::default()
        }));
        let ip = addr(11);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            tasks.push(tokio::spawn(async move {
                (0..50).filter(|_| limiter.can_perform_request(ip)).count()
            }));
        }
        let mut admitted = 0;
        for task in tasks {
            let Ok(count) = task.await else {
                panic!("task failed");
            };
            admitted += count;
        }
        assert_eq!(admitted, 100);
        assert_eq!(limiter.credits(ip), Some(0));
    }
}
