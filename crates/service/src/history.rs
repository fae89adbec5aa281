//! Routing history of the node, kept locally for per-channel statistics.

use async_trait::async_trait;
use thiserror::Error;
use tracing::*;

const NANOS_PER_SEC: u64 = 1_000_000_000;

const DAY_SECS: u64 = 24 * 60 * 60;

/// How far back the first sync reaches, roughly six months.
pub const HISTORY_WINDOW_SECS: u64 = 182 * DAY_SECS;

/// Events requested per page.
pub const PAGE_SIZE: u32 = 50_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One forwarded HTLC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingEvent {
    pub timestamp_ns: u64,
    pub chan_id_in: u64,
    pub chan_id_out: u64,
    /// Amounts in sat.
    pub amt_in: u64,
    pub amt_out: u64,
    pub fee_msat: u64,
}

/// A page of forwarding events.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardingPage {
    pub events: Vec<ForwardingEvent>,
    pub last_offset_index: u32,
}

#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait ForwardingHistorySource: Send + Sync {
    /// Events since `start_secs`, skipping the first `offset` of them.
    async fn forwarding_history(
        &self,
        start_secs: u64,
        offset: u32,
        max_events: u32,
    ) -> Result<ForwardingPage, HistoryError>;
}

/// Statistics of one channel over the 7 day, 30 day and six month windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStats {
    pub amount_out_7d: u64,
    pub amount_out_30d: u64,
    pub amount_out_6m: u64,
    pub amount_in_7d: u64,
    pub amount_in_30d: u64,
    pub amount_in_6m: u64,
    /// Fees earned routing out through the channel, in sat.
    pub fee_sat_7d: u64,
    pub fee_sat_30d: u64,
    pub fee_sat_6m: u64,
    /// Fees earned on forwards that entered through the channel, in sat.
    pub assisted_fee_sat_7d: u64,
    pub assisted_fee_sat_30d: u64,
    pub assisted_fee_sat_6m: u64,
}

/// Append-only log of forwarding events, ordered by time.
#[derive(Debug, Clone, Default)]
pub struct ForwardingLog {
    events: Vec<ForwardingEvent>,
}

impl ForwardingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ForwardingEvent] {
        &self.events
    }

    /// Where the next sync starts: one second past the newest event, or the start of the
    /// history window for an empty log.
    pub fn resume_from(&self, now_secs: u64) -> u64 {
        match self.events.last() {
            Some(e) => e.timestamp_ns / NANOS_PER_SEC + 1,
            None => now_secs.saturating_sub(HISTORY_WINDOW_SECS),
        }
    }

    /// Pulls every event newer than the log's cursor. Returns how many were added.
    pub async fn sync<H>(&mut self, source: &H, now_secs: u64) -> Result<usize, HistoryError>
    where
        H: ForwardingHistorySource + ?Sized,
    {
        let start = self.resume_from(now_secs);
        let mut offset = 0;
        let mut added = 0;

        loop {
            let page = source.forwarding_history(start, offset, PAGE_SIZE).await?;
            let full = page.events.len() >= PAGE_SIZE as usize;
            added += page.events.len();
            self.events.extend(page.events);
            if !full {
                break;
            }
            offset = page.last_offset_index + 1;
        }

        debug!(%start, %added, total = self.events.len(), "forwarding history synced");
        Ok(added)
    }

    pub fn channel_stats(&self, channel_id: u64, now_secs: u64) -> ChannelStats {
        let since_7d = now_secs.saturating_sub(7 * DAY_SECS) * NANOS_PER_SEC;
        let since_30d = now_secs.saturating_sub(30 * DAY_SECS) * NANOS_PER_SEC;
        let since_6m = now_secs.saturating_sub(HISTORY_WINDOW_SECS) * NANOS_PER_SEC;

        let mut stats = ChannelStats::default();
        let (mut fee_7d, mut fee_30d, mut fee_6m) = (0, 0, 0);
        let (mut assisted_7d, mut assisted_30d, mut assisted_6m) = (0, 0, 0);

        for e in self.events.iter().filter(|e| e.timestamp_ns > since_6m) {
            let in_30d = e.timestamp_ns > since_30d;
            let in_7d = e.timestamp_ns > since_7d;

            if e.chan_id_out == channel_id {
                stats.amount_out_6m += e.amt_out;
                fee_6m += e.fee_msat;
                if in_30d {
                    stats.amount_out_30d += e.amt_out;
                    fee_30d += e.fee_msat;
                }
                if in_7d {
                    stats.amount_out_7d += e.amt_out;
                    fee_7d += e.fee_msat;
                }
            }
            if e.chan_id_in == channel_id {
                stats.amount_in_6m += e.amt_in;
                assisted_6m += e.fee_msat;
                if in_30d {
                    stats.amount_in_30d += e.amt_in;
                    assisted_30d += e.fee_msat;
                }
                if in_7d {
                    stats.amount_in_7d += e.amt_in;
                    assisted_7d += e.fee_msat;
                }
            }
        }

        // Summed in msat, truncated once.
        stats.fee_sat_7d = fee_7d / 1000;
        stats.fee_sat_30d = fee_30d / 1000;
        stats.fee_sat_6m = fee_6m / 1000;
        stats.assisted_fee_sat_7d = assisted_7d / 1000;
        stats.assisted_fee_sat_30d = assisted_30d / 1000;
        stats.assisted_fee_sat_6m = assisted_6m / 1000;
        stats
    }

    /// Balance change of a channel since `since_secs`: inbound forwards add, outbound
    /// forwards subtract.
    pub fn net_flow(&self, channel_id: u64, since_secs: u64) -> i64 {
        let since_ns = since_secs.saturating_mul(NANOS_PER_SEC);
        self.events
            .iter()
            .filter(|e| e.timestamp_ns > since_ns)
            .map(|e| {
                let mut flow = 0i64;
                if e.chan_id_out == channel_id {
                    flow -= e.amt_out as i64;
                }
                if e.chan_id_in == channel_id {
                    flow += e.amt_in as i64;
                }
                flow
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn event(
        secs_ago: u64,
        chan_in: u64,
        chan_out: u64,
        amt: u64,
        fee_msat: u64,
    ) -> ForwardingEvent {
        ForwardingEvent {
            timestamp_ns: (NOW - secs_ago) * NANOS_PER_SEC,
            chan_id_in: chan_in,
            chan_id_out: chan_out,
            amt_in: amt + fee_msat / 1000,
            amt_out: amt,
            fee_msat,
        }
    }

    fn log_of(events: Vec<ForwardingEvent>) -> ForwardingLog {
        ForwardingLog { events }
    }

    #[test]
    fn test_resume_cursor() {
        let empty = ForwardingLog::new();
        assert_eq!(empty.resume_from(NOW), NOW - HISTORY_WINDOW_SECS);

        let log = log_of(vec![event(100, 1, 2, 1_000, 1_500)]);
        assert_eq!(log.resume_from(NOW), NOW - 100 + 1);
    }

    #[test]
    fn test_channel_stats_windows() {
        let log = log_of(vec![
            event(DAY_SECS, 1, 7, 10_000, 1_500),
            event(10 * DAY_SECS, 1, 7, 20_000, 2_500),
            event(90 * DAY_SECS, 7, 2, 30_000, 3_000),
            event(200 * DAY_SECS, 1, 7, 99_000, 9_000),
        ]);

        let stats = log.channel_stats(7, NOW);
        assert_eq!(stats.amount_out_7d, 10_000);
        assert_eq!(stats.amount_out_30d, 30_000);
        assert_eq!(stats.amount_out_6m, 30_000, "older than six months is ignored");
        assert_eq!(stats.fee_sat_7d, 1);
        assert_eq!(stats.fee_sat_30d, 4, "msat are summed before truncating");
        assert_eq!(stats.amount_in_30d, 0);
        assert_eq!(stats.amount_in_6m, 30_003);
        assert_eq!(stats.assisted_fee_sat_6m, 3);
    }

    #[test]
    fn test_net_flow() {
        let log = log_of(vec![
            event(50, 1, 7, 10_000, 0),
            event(40, 7, 2, 4_000, 0),
            event(5_000, 7, 2, 1_000_000, 0),
        ]);
        assert_eq!(log.net_flow(7, NOW - 100), 4_000 - 10_000);
        assert_eq!(log.net_flow(9, NOW - 100), 0);
    }

    #[tokio::test]
    async fn test_sync_pages_and_resumes() {
        let mut source = MockForwardingHistorySource::new();
        let full_page = ForwardingPage {
            events: (0..PAGE_SIZE as u64)
                .map(|i| event(1_000 - i / 100, 1, 2, 1, 0))
                .collect(),
            last_offset_index: PAGE_SIZE - 1,
        };
        let tail = ForwardingPage {
            events: vec![event(10, 1, 2, 5, 0)],
            last_offset_index: PAGE_SIZE,
        };

        let start = NOW - HISTORY_WINDOW_SECS;
        source
            .expect_forwarding_history()
            .with(eq(start), eq(0), eq(PAGE_SIZE))
            .times(1)
            .return_once(move |_, _, _| Ok(full_page));
        source
            .expect_forwarding_history()
            .with(eq(start), eq(PAGE_SIZE), eq(PAGE_SIZE))
            .times(1)
            .return_once(move |_, _, _| Ok(tail));

        let mut log = ForwardingLog::new();
        let added = log.sync(&source, NOW).await.unwrap();
        assert_eq!(added, PAGE_SIZE as usize + 1);
        assert_eq!(log.resume_from(NOW), NOW - 10 + 1);

        let mut source = MockForwardingHistorySource::new();
        source
            .expect_forwarding_history()
            .with(eq(NOW - 9), eq(0), eq(PAGE_SIZE))
            .times(1)
            .return_once(|_, _, _| Ok(ForwardingPage::default()));
        assert_eq!(log.sync(&source, NOW).await.unwrap(), 0);
        assert_eq!(log.events().len(), PAGE_SIZE as usize + 1);
    }
}
