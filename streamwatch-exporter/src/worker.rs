//! Per-stream polling and mapping of API results onto the registry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, VideoDetails, VideoPlatformApi, VideoStatistics};
use crate::entity::StreamEntity;
use crate::registry::{RegistryError, SharedRegistry};
use crate::schema::{
    API_ERROR_COUNT, CHANNEL_INFO, CHANNEL_SUBSCRIBERS, ENGAGEMENT_RATE, LabelFamily, Labels,
    STREAM_CHECK_COUNT, STREAM_ERROR_COUNT, STREAM_STATUS, STREAM_VIEWERS, VIDEO_COMMENTS,
    VIDEO_FAVORITES, VIDEO_INFO, VIDEO_LIKES, VIDEO_VIEWS,
};

/// Number of description characters kept in the channel info record.
const DESCRIPTION_LIMIT: usize = 100;

/// Polling cadence of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollCadence {
    /// Sleep between ticks.
    pub interval: Duration,
    /// Fetch engagement statistics every N ticks.
    pub engagement_every: u64,
    /// Fetch channel details every N ticks.
    pub channel_every: u64,
}

impl Default for PollCadence {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            engagement_every: 5,
            channel_every: 10,
        }
    }
}

impl PollCadence {
    pub fn engagement_due(&self, tick: u64) -> bool {
        self.engagement_every > 0 && tick % self.engagement_every == 0
    }

    pub fn channel_due(&self, tick: u64) -> bool {
        self.channel_every > 0 && tick % self.channel_every == 0
    }
}

/// Result of one status check. All defaults when the API failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStatus {
    pub is_live: bool,
    pub viewers: u64,
    pub title: String,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub status: StreamStatus,
    pub engagement_polled: bool,
    pub channel_polled: bool,
}

/// Label tuples of one entity, built once.
struct EntityLabels {
    status: Labels,
    stream: Labels,
    channel: Labels,
    channel_info: Labels,
    video_info: Labels,
}

impl EntityLabels {
    fn new(entity: &StreamEntity) -> Self {
        Self {
            status: entity.labels(LabelFamily::Status),
            stream: entity.labels(LabelFamily::Stream),
            channel: entity.labels(LabelFamily::Channel),
            channel_info: entity.labels(LabelFamily::ChannelInfo),
            video_info: entity.labels(LabelFamily::VideoInfo),
        }
    }
}

/// Polls the API for a single stream and writes the results to the registry.
///
/// API failures never escape: they become counter increments and a warning.
/// Only registry misuse, which is a programming error, is returned.
pub struct StreamPoller {
    entity: StreamEntity,
    api: Arc<dyn VideoPlatformApi>,
    registry: SharedRegistry,
    cadence: PollCadence,
    labels: EntityLabels,
}

impl StreamPoller {
    /// Create a new poller for a stream.
    pub fn new(
        entity: StreamEntity,
        api: Arc<dyn VideoPlatformApi>,
        registry: SharedRegistry,
        cadence: PollCadence,
    ) -> Self {
        let labels = EntityLabels::new(&entity);
        Self {
            entity,
            api,
            registry,
            cadence,
            labels,
        }
    }

    pub fn entity(&self) -> &StreamEntity {
        &self.entity
    }

    /// Run the polling loop until `shutdown` turns true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), RegistryError> {
        info!(
            stream = %self.entity.stream_name,
            channel = %self.entity.channel_name,
            video_id = %self.entity.video_id,
            interval_secs = self.cadence.interval.as_secs_f64(),
            "Starting stream poller"
        );

        let mut count: u64 = 0;
        while !*shutdown.borrow() {
            let report = self.tick(count).await?;
            debug!(
                stream = %self.entity.stream_name,
                tick = report.tick,
                live = report.status.is_live,
                engagement = report.engagement_polled,
                channel = report.channel_polled,
                "Tick complete"
            );
            count += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.cadence.interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!(stream = %self.entity.stream_name, "Stream poller stopped");
        Ok(())
    }

    /// Run one tick: status always, engagement and channel when due.
    pub async fn tick(&self, count: u64) -> Result<TickReport, RegistryError> {
        let status = self.check_stream_status().await?;

        let engagement_polled = self.cadence.engagement_due(count);
        if engagement_polled {
            self.video_engagement().await?;
        }

        let channel_polled = self.cadence.channel_due(count);
        if channel_polled {
            self.channel_info().await?;
        }

        Ok(TickReport {
            tick: count,
            status,
            engagement_polled,
            channel_polled,
        })
    }

    /// Check whether the stream is live and record its viewer count.
    ///
    /// `stream_check_count` goes up by exactly one on every call. An offline
    /// stream also counts towards `stream_error_count`.
    pub async fn check_stream_status(&self) -> Result<StreamStatus, RegistryError> {
        self.registry.inc(STREAM_CHECK_COUNT, &self.labels.stream)?;

        let details = match self.api.video_details(&self.entity.video_id).await {
            Ok(details) => details,
            Err(ApiError::UpstreamEmpty) => {
                debug!(
                    stream = %self.entity.stream_name,
                    video_id = %self.entity.video_id,
                    "Video not found, reporting offline"
                );
                VideoDetails::default()
            }
            Err(e) => {
                self.registry
                    .set_gauge(STREAM_STATUS, &self.labels.status, 0.0)?;
                self.registry.inc(STREAM_ERROR_COUNT, &self.labels.stream)?;
                self.registry.inc(API_ERROR_COUNT, &self.labels.stream)?;
                warn!(
                    stream = %self.entity.stream_name,
                    channel = %self.entity.channel_name,
                    kind = e.kind(),
                    error = %e,
                    "API error while checking stream status"
                );
                return Ok(StreamStatus::default());
            }
        };

        let is_live = details.is_live();
        let viewers = details.concurrent_viewers.unwrap_or(0);

        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), details.title.clone());
        fields.insert(
            "is_live".to_string(),
            if is_live { "True" } else { "False" }.to_string(),
        );
        fields.insert("last_updated".to_string(), timestamp());
        self.registry
            .record_info(VIDEO_INFO, &self.labels.video_info, fields)?;

        self.registry.set_gauge(
            STREAM_STATUS,
            &self.labels.status,
            if is_live { 1.0 } else { 0.0 },
        )?;
        self.registry
            .set_gauge(STREAM_VIEWERS, &self.labels.stream, viewers as f64)?;

        info!(
            stream = %self.entity.stream_name,
            channel = %self.entity.channel_name,
            status = if is_live { "LIVE" } else { "OFFLINE" },
            viewers,
            "Stream checked"
        );

        if !is_live {
            self.registry.inc(STREAM_ERROR_COUNT, &self.labels.stream)?;
        }

        Ok(StreamStatus {
            is_live,
            viewers,
            title: details.title,
        })
    }

    /// Record views, likes, comments, favorites and the engagement rate.
    ///
    /// The rate is only updated when the video has views.
    pub async fn video_engagement(&self) -> Result<VideoStatistics, RegistryError> {
        let stats = match self.api.video_statistics(&self.entity.video_id).await {
            Ok(stats) => stats,
            Err(ApiError::UpstreamEmpty) => {
                debug!(
                    stream = %self.entity.stream_name,
                    video_id = %self.entity.video_id,
                    "No statistics returned"
                );
                return Ok(VideoStatistics::default());
            }
            Err(e) => {
                self.registry.inc(API_ERROR_COUNT, &self.labels.stream)?;
                warn!(
                    stream = %self.entity.stream_name,
                    channel = %self.entity.channel_name,
                    kind = e.kind(),
                    error = %e,
                    "Failed to get engagement data"
                );
                return Ok(VideoStatistics::default());
            }
        };

        let labels = &self.labels.stream;
        self.registry
            .set_gauge(VIDEO_VIEWS, labels, stats.view_count as f64)?;
        self.registry
            .set_gauge(VIDEO_LIKES, labels, stats.like_count as f64)?;
        self.registry
            .set_gauge(VIDEO_COMMENTS, labels, stats.comment_count as f64)?;
        self.registry
            .set_gauge(VIDEO_FAVORITES, labels, stats.favorite_count as f64)?;

        if let Some(rate) = engagement_rate(&stats) {
            self.registry.set_gauge(ENGAGEMENT_RATE, labels, rate)?;
        }

        info!(
            stream = %self.entity.stream_name,
            channel = %self.entity.channel_name,
            views = stats.view_count,
            likes = stats.like_count,
            comments = stats.comment_count,
            "Engagement updated"
        );

        Ok(stats)
    }

    /// Record the subscriber count and refresh the channel info record.
    pub async fn channel_info(&self) -> Result<u64, RegistryError> {
        let channel = match self.api.channel_details(&self.entity.channel_id).await {
            Ok(channel) => channel,
            Err(ApiError::UpstreamEmpty) => {
                debug!(
                    stream = %self.entity.stream_name,
                    channel_id = %self.entity.channel_id,
                    "Channel not found"
                );
                return Ok(0);
            }
            Err(e) => {
                self.registry.inc(API_ERROR_COUNT, &self.labels.stream)?;
                warn!(
                    stream = %self.entity.stream_name,
                    channel = %self.entity.channel_name,
                    kind = e.kind(),
                    error = %e,
                    "Failed to get channel information"
                );
                return Ok(0);
            }
        };

        self.registry.set_gauge(
            CHANNEL_SUBSCRIBERS,
            &self.labels.channel,
            channel.subscriber_count as f64,
        )?;

        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), channel.title);
        fields.insert(
            "description".to_string(),
            truncate_description(&channel.description),
        );
        fields.insert(
            "subscriber_count".to_string(),
            channel.subscriber_count.to_string(),
        );
        fields.insert("last_updated".to_string(), timestamp());
        self.registry
            .record_info(CHANNEL_INFO, &self.labels.channel_info, fields)?;

        info!(
            stream = %self.entity.stream_name,
            channel = %self.entity.channel_name,
            subscribers = channel.subscriber_count,
            "Channel info updated"
        );

        Ok(channel.subscriber_count)
    }
}

/// Likes per view as a percentage, or `None` without views.
pub fn engagement_rate(stats: &VideoStatistics) -> Option<f64> {
    if stats.view_count == 0 {
        return None;
    }
    Some(stats.like_count as f64 / stats.view_count as f64 * 100.0)
}

/// First 100 characters of the description followed by an ellipsis.
fn truncate_description(description: &str) -> String {
    let head: String = description.chars().take(DESCRIPTION_LIMIT).collect();
    format!("{}...", head)
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Resolve once the shutdown flag is set or the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MockApi;
    use super::*;
    use crate::entity::test_entity;
    use crate::registry::MetricRegistry;

    fn setup(api: MockApi) -> (StreamPoller, Arc<MockApi>, SharedRegistry) {
        let registry = Arc::new(MetricRegistry::new("youtube"));
        let entity = test_entity("main");
        registry.register_stream(&entity).unwrap();

        let api = Arc::new(api);
        let poller = StreamPoller::new(
            entity,
            api.clone(),
            registry.clone(),
            PollCadence::default(),
        );
        (poller, api, registry)
    }

    fn stream_labels(poller: &StreamPoller) -> Labels {
        poller.entity().labels(LabelFamily::Stream)
    }

    fn counter(registry: &SharedRegistry, poller: &StreamPoller, name: &str) -> f64 {
        registry.counter(name, &stream_labels(poller)).unwrap()
    }

    #[test]
    fn test_default_cadence() {
        let cadence = PollCadence::default();
        assert_eq!(cadence.interval, Duration::from_secs(30));
        assert!(cadence.engagement_due(0));
        assert!(cadence.channel_due(0));
        assert!(!cadence.engagement_due(3));
        assert!(cadence.engagement_due(5));
        assert!(!cadence.channel_due(5));
        assert!(cadence.channel_due(20));
    }

    #[test]
    fn test_engagement_rate() {
        let stats = VideoStatistics {
            view_count: 200,
            like_count: 10,
            ..Default::default()
        };
        assert_eq!(engagement_rate(&stats), Some(5.0));
        assert_eq!(engagement_rate(&VideoStatistics::default()), None);
    }

    #[test]
    fn test_truncate_description() {
        assert_eq!(truncate_description("short"), "short...");

        let long = "é".repeat(150);
        let truncated = truncate_description(&long);
        assert_eq!(truncated.chars().count(), 103);
        assert!(truncated.ends_with("..."));
    }

    #[tokio::test]
    async fn test_live_stream() {
        let (poller, _api, registry) = setup(MockApi::live(321));

        let status = poller.check_stream_status().await.unwrap();
        assert!(status.is_live);
        assert_eq!(status.viewers, 321);
        assert_eq!(status.title, "Live now");

        let entity = poller.entity();
        assert_eq!(
            registry.gauge(STREAM_STATUS, &entity.labels(LabelFamily::Status)),
            Some(1.0)
        );
        assert_eq!(
            registry.gauge(STREAM_VIEWERS, &stream_labels(&poller)),
            Some(321.0)
        );
        assert_eq!(counter(&registry, &poller, STREAM_CHECK_COUNT), 1.0);
        assert_eq!(counter(&registry, &poller, STREAM_ERROR_COUNT), 0.0);

        let info = registry
            .info(VIDEO_INFO, &entity.labels(LabelFamily::VideoInfo))
            .unwrap();
        assert_eq!(info.get("title").map(String::as_str), Some("Live now"));
        assert_eq!(info.get("is_live").map(String::as_str), Some("True"));
        assert!(info.contains_key("last_updated"));
    }

    #[tokio::test]
    async fn test_offline_counts_as_stream_error() {
        let api = MockApi::live(0);
        *api.details.lock() = Ok(VideoDetails {
            live_broadcast_content: "none".to_string(),
            title: "Replay".to_string(),
            concurrent_viewers: None,
        });
        let (poller, _api, registry) = setup(api);

        let status = poller.check_stream_status().await.unwrap();
        assert!(!status.is_live);
        assert_eq!(status.viewers, 0);

        assert_eq!(counter(&registry, &poller, STREAM_ERROR_COUNT), 1.0);
        assert_eq!(counter(&registry, &poller, API_ERROR_COUNT), 0.0);
        assert_eq!(counter(&registry, &poller, STREAM_CHECK_COUNT), 1.0);
        // Viewers are written even when zero
        assert_eq!(
            registry.gauge(STREAM_VIEWERS, &stream_labels(&poller)),
            Some(0.0)
        );
    }

    #[tokio::test]
    async fn test_status_api_failure() {
        let (poller, api, registry) = setup(MockApi::live(50));
        let status_labels = poller.entity().labels(LabelFamily::Status);

        poller.check_stream_status().await.unwrap();
        assert_eq!(registry.gauge(STREAM_STATUS, &status_labels), Some(1.0));

        *api.details.lock() = Err(ApiError::Network("timed out".to_string()));
        let status = poller.check_stream_status().await.unwrap();

        assert_eq!(status, StreamStatus::default());
        assert_eq!(registry.gauge(STREAM_STATUS, &status_labels), Some(0.0));
        assert_eq!(counter(&registry, &poller, STREAM_ERROR_COUNT), 1.0);
        assert_eq!(counter(&registry, &poller, API_ERROR_COUNT), 1.0);
        assert_eq!(counter(&registry, &poller, STREAM_CHECK_COUNT), 2.0);
        // Last successful viewer count is kept
        assert_eq!(
            registry.gauge(STREAM_VIEWERS, &stream_labels(&poller)),
            Some(50.0)
        );
    }

    #[tokio::test]
    async fn test_empty_video_is_offline_not_api_error() {
        let api = MockApi::live(10);
        *api.details.lock() = Err(ApiError::UpstreamEmpty);
        let (poller, _api, registry) = setup(api);

        let status = poller.check_stream_status().await.unwrap();
        assert_eq!(status, StreamStatus::default());
        assert_eq!(counter(&registry, &poller, STREAM_ERROR_COUNT), 1.0);
        assert_eq!(counter(&registry, &poller, API_ERROR_COUNT), 0.0);

        let info = registry
            .info(
                VIDEO_INFO,
                &poller.entity().labels(LabelFamily::VideoInfo),
            )
            .unwrap();
        assert_eq!(info.get("is_live").map(String::as_str), Some("False"));
    }

    #[tokio::test]
    async fn test_heartbeat_counts_every_check() {
        let (poller, api, registry) = setup(MockApi::live(1));

        for i in 0..12 {
            *api.details.lock() = match i % 3 {
                0 => Err(ApiError::Parse("bad json".to_string())),
                1 => Err(ApiError::UpstreamEmpty),
                _ => MockApi::live(1).details.into_inner(),
            };
            poller.check_stream_status().await.unwrap();
        }

        assert_eq!(counter(&registry, &poller, STREAM_CHECK_COUNT), 12.0);
        // Parse errors and empty responses are both offline
        assert_eq!(counter(&registry, &poller, STREAM_ERROR_COUNT), 8.0);
        assert_eq!(counter(&registry, &poller, API_ERROR_COUNT), 4.0);
    }

    #[tokio::test]
    async fn test_engagement() {
        let (poller, _api, registry) = setup(MockApi::live(1));
        let labels = stream_labels(&poller);

        let stats = poller.video_engagement().await.unwrap();
        assert_eq!(stats.view_count, 200);

        assert_eq!(registry.gauge(VIDEO_VIEWS, &labels), Some(200.0));
        assert_eq!(registry.gauge(VIDEO_LIKES, &labels), Some(10.0));
        assert_eq!(registry.gauge(VIDEO_COMMENTS, &labels), Some(4.0));
        assert_eq!(registry.gauge(VIDEO_FAVORITES, &labels), Some(0.0));
        assert_eq!(registry.gauge(ENGAGEMENT_RATE, &labels), Some(5.0));
    }

    #[tokio::test]
    async fn test_engagement_rate_untouched_without_views() {
        let (poller, api, registry) = setup(MockApi::live(1));
        let labels = stream_labels(&poller);

        poller.video_engagement().await.unwrap();
        assert_eq!(registry.gauge(ENGAGEMENT_RATE, &labels), Some(5.0));

        *api.statistics.lock() = Ok(VideoStatistics {
            view_count: 0,
            like_count: 3,
            ..Default::default()
        });
        poller.video_engagement().await.unwrap();

        assert_eq!(registry.gauge(VIDEO_VIEWS, &labels), Some(0.0));
        assert_eq!(registry.gauge(VIDEO_LIKES, &labels), Some(3.0));
        assert_eq!(registry.gauge(ENGAGEMENT_RATE, &labels), Some(5.0));
    }

    #[tokio::test]
    async fn test_engagement_failure_counts_api_error_only() {
        let (poller, _api, registry) = setup(MockApi::failing());

        let stats = poller.video_engagement().await.unwrap();
        assert_eq!(stats, VideoStatistics::default());

        assert_eq!(counter(&registry, &poller, API_ERROR_COUNT), 1.0);
        assert_eq!(counter(&registry, &poller, STREAM_ERROR_COUNT), 0.0);
        assert_eq!(counter(&registry, &poller, STREAM_CHECK_COUNT), 0.0);
    }

    #[tokio::test]
    async fn test_channel_info() {
        let (poller, _api, registry) = setup(MockApi::live(1));
        let entity = poller.entity().clone();

        let subscribers = poller.channel_info().await.unwrap();
        assert_eq!(subscribers, 5000);

        assert_eq!(
            registry.gauge(CHANNEL_SUBSCRIBERS, &entity.labels(LabelFamily::Channel)),
            Some(5000.0)
        );
        let info = registry
            .info(CHANNEL_INFO, &entity.labels(LabelFamily::ChannelInfo))
            .unwrap();
        assert_eq!(info.get("title").map(String::as_str), Some("Main Channel"));
        assert_eq!(
            info.get("description").map(String::as_str),
            Some("Streams every day...")
        );
        assert_eq!(
            info.get("subscriber_count").map(String::as_str),
            Some("5000")
        );
    }

    #[tokio::test]
    async fn test_channel_failure() {
        let (poller, _api, registry) = setup(MockApi::failing());

        assert_eq!(poller.channel_info().await.unwrap(), 0);
        assert_eq!(counter(&registry, &poller, API_ERROR_COUNT), 1.0);
        assert_eq!(
            registry.gauge(
                CHANNEL_SUBSCRIBERS,
                &poller.entity().labels(LabelFamily::Channel)
            ),
            Some(0.0)
        );
    }

    #[tokio::test]
    async fn test_empty_statistics_write_nothing() {
        let (poller, api, registry) = setup(MockApi::live(1));
        let labels = stream_labels(&poller);

        poller.video_engagement().await.unwrap();
        let before = registry.render();

        *api.statistics.lock() = Err(ApiError::UpstreamEmpty);
        let stats = poller.video_engagement().await.unwrap();

        assert_eq!(stats, VideoStatistics::default());
        assert_eq!(registry.gauge(VIDEO_VIEWS, &labels), Some(200.0));
        assert_eq!(registry.gauge(ENGAGEMENT_RATE, &labels), Some(5.0));
        assert_eq!(counter(&registry, &poller, API_ERROR_COUNT), 0.0);
        assert_eq!(counter(&registry, &poller, STREAM_ERROR_COUNT), 0.0);
        assert_eq!(registry.render(), before);
    }

    #[tokio::test]
    async fn test_empty_channel_writes_nothing() {
        let (poller, api, registry) = setup(MockApi::live(1));
        let entity = poller.entity().clone();

        poller.channel_info().await.unwrap();
        let info_before = registry
            .info(CHANNEL_INFO, &entity.labels(LabelFamily::ChannelInfo))
            .unwrap();

        *api.channel.lock() = Err(ApiError::UpstreamEmpty);
        assert_eq!(poller.channel_info().await.unwrap(), 0);

        assert_eq!(
            registry.gauge(CHANNEL_SUBSCRIBERS, &entity.labels(LabelFamily::Channel)),
            Some(5000.0)
        );
        assert_eq!(
            registry.info(CHANNEL_INFO, &entity.labels(LabelFamily::ChannelInfo)),
            Some(info_before)
        );
        assert_eq!(counter(&registry, &poller, API_ERROR_COUNT), 0.0);
        assert_eq!(counter(&registry, &poller, STREAM_ERROR_COUNT), 0.0);
    }

    #[tokio::test]
    async fn test_cadence_over_eleven_ticks() {
        let (poller, api, _registry) = setup(MockApi::live(1));

        let mut engagement_ticks = Vec::new();
        let mut channel_ticks = Vec::new();
        for count in 0..=10 {
            let report = poller.tick(count).await.unwrap();
            if report.engagement_polled {
                engagement_ticks.push(count);
            }
            if report.channel_polled {
                channel_ticks.push(count);
            }
        }

        assert_eq!(engagement_ticks, vec![0, 5, 10]);
        assert_eq!(channel_ticks, vec![0, 10]);
        assert_eq!(api.count("details"), 11);
        assert_eq!(api.count("statistics"), 3);
        assert_eq!(api.count("channel"), 2);
    }

    #[tokio::test]
    async fn test_status_check_runs_first_in_tick() {
        let (poller, api, _registry) = setup(MockApi::live(1));

        poller.tick(0).await.unwrap();
        assert_eq!(
            *api.calls.lock(),
            vec!["details", "statistics", "channel"]
        );
    }

    #[tokio::test]
    async fn test_failing_worker_leaves_other_entities_alone() {
        let registry = Arc::new(MetricRegistry::new("youtube"));
        let healthy = test_entity("healthy");
        let broken = test_entity("broken");
        registry.register_stream(&healthy).unwrap();
        registry.register_stream(&broken).unwrap();
        let before = registry.render();

        let poller = StreamPoller::new(
            broken,
            Arc::new(MockApi::failing()),
            registry.clone(),
            PollCadence::default(),
        );
        for count in 0..10 {
            poller.tick(count).await.unwrap();
        }

        let healthy_lines = |output: &str| -> Vec<String> {
            output
                .lines()
                .filter(|l| l.contains("stream=\"healthy\""))
                .map(str::to_string)
                .collect()
        };
        assert_eq!(healthy_lines(&registry.render()), healthy_lines(&before));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(MetricRegistry::new("youtube"));
        let entity = test_entity("main");
        registry.register_stream(&entity).unwrap();
        let cadence = PollCadence {
            interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let poller = StreamPoller::new(
            entity.clone(),
            Arc::new(MockApi::live(1)),
            registry.clone(),
            cadence,
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(rx));

        // Wait for the first tick, then interrupt the long sleep
        for _ in 0..100 {
            let checks = registry
                .counter(STREAM_CHECK_COUNT, &entity.labels(LabelFamily::Stream))
                .unwrap();
            if checks >= 1.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(
            registry.counter(STREAM_CHECK_COUNT, &entity.labels(LabelFamily::Stream)),
            Some(1.0)
        );
    }
}
