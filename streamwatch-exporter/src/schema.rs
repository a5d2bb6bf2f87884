//! Static declaration of every metric the exporter publishes.
//!
//! Each metric belongs to a [`LabelFamily`], which fixes the ordered set of
//! label keys every write must supply. The registry validates all writes
//! against these declarations.

use thiserror::Error;

pub const STREAM_STATUS: &str = "stream_status";
pub const STREAM_VIEWERS: &str = "stream_viewers";
pub const VIDEO_VIEWS: &str = "video_views";
pub const VIDEO_LIKES: &str = "video_likes";
pub const VIDEO_COMMENTS: &str = "video_comments";
pub const VIDEO_FAVORITES: &str = "video_favorites";
pub const ENGAGEMENT_RATE: &str = "engagement_rate";
pub const CHANNEL_SUBSCRIBERS: &str = "channel_subscribers";
pub const STREAM_CHECK_COUNT: &str = "stream_check_count";
pub const STREAM_ERROR_COUNT: &str = "stream_error_count";
pub const API_ERROR_COUNT: &str = "api_error_count";
pub const CHANNEL_INFO: &str = "channel_info";
pub const VIDEO_INFO: &str = "video_info";

pub const LABEL_CHANNEL_ID: &str = "channel_id";
pub const LABEL_STREAM: &str = "stream";
pub const LABEL_VIDEO_ID: &str = "video_id";
pub const LABEL_CHANNEL_NAME: &str = "channel_name";
pub const LABEL_ENVIRONMENT: &str = "environment";

/// Schema declaration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Metric '{0}' is declared more than once")]
    DuplicateMetric(&'static str),
    #[error("Invalid metric name: '{0}'")]
    InvalidMetricName(String),
    #[error("Metric '{metric}' has invalid label name '{label}'")]
    InvalidLabelName {
        metric: &'static str,
        label: &'static str,
    },
    #[error("Metric '{metric}' declares label '{label}' twice")]
    DuplicateLabel {
        metric: &'static str,
        label: &'static str,
    },
}

/// The kind of a declared metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Point-in-time value, may go up or down.
    Gauge,
    /// Monotonically non-decreasing accumulator.
    Counter,
    /// String field map rendered as a constant `1` sample.
    Info,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Info => "info",
        }
    }

    /// The TYPE used in the text exposition format.
    ///
    /// Format 0.0.4 has no info type, so info records are exposed as gauges.
    pub fn exposition_type(&self) -> &'static str {
        match self {
            MetricKind::Gauge | MetricKind::Info => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// A fixed, ordered set of label keys shared by several metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelFamily {
    /// Stream labels plus the deployment environment.
    Status,
    /// One monitored (channel, video) pair.
    Stream,
    /// Channel-level metrics, no video.
    Channel,
    /// Channel metadata record.
    ChannelInfo,
    /// Video metadata record.
    VideoInfo,
}

impl LabelFamily {
    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            LabelFamily::Status => &[
                LABEL_CHANNEL_ID,
                LABEL_STREAM,
                LABEL_VIDEO_ID,
                LABEL_CHANNEL_NAME,
                LABEL_ENVIRONMENT,
            ],
            LabelFamily::Stream => &[
                LABEL_CHANNEL_ID,
                LABEL_STREAM,
                LABEL_VIDEO_ID,
                LABEL_CHANNEL_NAME,
            ],
            LabelFamily::Channel => &[LABEL_CHANNEL_ID, LABEL_STREAM, LABEL_CHANNEL_NAME],
            LabelFamily::ChannelInfo => &[LABEL_CHANNEL_ID, LABEL_CHANNEL_NAME],
            LabelFamily::VideoInfo => &[LABEL_VIDEO_ID, LABEL_CHANNEL_ID, LABEL_STREAM],
        }
    }
}

/// Declaration of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
    pub family: LabelFamily,
}

impl MetricDescriptor {
    const fn new(
        name: &'static str,
        kind: MetricKind,
        help: &'static str,
        family: LabelFamily,
    ) -> Self {
        Self {
            name,
            kind,
            help,
            family,
        }
    }

    pub fn label_names(&self) -> &'static [&'static str] {
        self.family.label_names()
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self.kind, MetricKind::Info)
    }
}

/// Every metric the exporter knows about.
pub static METRICS: &[MetricDescriptor] = &[
    MetricDescriptor::new(
        STREAM_STATUS,
        MetricKind::Gauge,
        "YouTube stream status (1=LIVE, 0=OFFLINE)",
        LabelFamily::Status,
    ),
    MetricDescriptor::new(
        STREAM_VIEWERS,
        MetricKind::Gauge,
        "YouTube stream viewer count",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        VIDEO_VIEWS,
        MetricKind::Gauge,
        "Total view count",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        VIDEO_LIKES,
        MetricKind::Gauge,
        "Like count",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        VIDEO_COMMENTS,
        MetricKind::Gauge,
        "Comment count",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        VIDEO_FAVORITES,
        MetricKind::Gauge,
        "Favorites count",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        ENGAGEMENT_RATE,
        MetricKind::Gauge,
        "Engagement rate (likes/views %)",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        CHANNEL_SUBSCRIBERS,
        MetricKind::Gauge,
        "Channel subscriber count",
        LabelFamily::Channel,
    ),
    MetricDescriptor::new(
        STREAM_CHECK_COUNT,
        MetricKind::Counter,
        "Total check count",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        STREAM_ERROR_COUNT,
        MetricKind::Counter,
        "Total error count (offline checks included)",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        API_ERROR_COUNT,
        MetricKind::Counter,
        "YouTube API error count",
        LabelFamily::Stream,
    ),
    MetricDescriptor::new(
        CHANNEL_INFO,
        MetricKind::Info,
        "YouTube channel information",
        LabelFamily::ChannelInfo,
    ),
    MetricDescriptor::new(
        VIDEO_INFO,
        MetricKind::Info,
        "YouTube video information",
        LabelFamily::VideoInfo,
    ),
];

/// Look up a declared metric by name.
pub fn descriptor(name: &str) -> Option<&'static MetricDescriptor> {
    METRICS.iter().find(|d| d.name == name)
}

/// Check the static declarations for internal consistency.
///
/// Run once at startup; a failure here is a programming error.
pub fn validate_schema() -> Result<(), SchemaError> {
    for (i, desc) in METRICS.iter().enumerate() {
        if METRICS[..i].iter().any(|d| d.name == desc.name) {
            return Err(SchemaError::DuplicateMetric(desc.name));
        }

        if !is_valid_metric_name(desc.name) {
            return Err(SchemaError::InvalidMetricName(desc.name.to_string()));
        }

        let labels = desc.label_names();
        for (j, label) in labels.iter().enumerate() {
            if !is_valid_label_name(label) {
                return Err(SchemaError::InvalidLabelName {
                    metric: desc.name,
                    label,
                });
            }
            if labels[..j].contains(label) {
                return Err(SchemaError::DuplicateLabel {
                    metric: desc.name,
                    label,
                });
            }
        }
    }

    Ok(())
}

/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*` and not start with `__`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A label tuple: label key to value, in insertion order.
///
/// Keys are unique; inserting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels(Vec<(String, String)>);

impl Labels {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if the keys are exactly `names`, ignoring order.
    pub fn matches(&self, names: &[&str]) -> bool {
        self.0.len() == names.len() && names.iter().all(|n| self.get(n).is_some())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut labels = Labels::new();
        for (k, v) in iter {
            labels.insert(k, v);
        }
        labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_valid() {
        assert_eq!(validate_schema(), Ok(()));
    }

    #[test]
    fn test_descriptor_lookup() {
        let desc = descriptor(STREAM_STATUS).unwrap();
        assert_eq!(desc.kind, MetricKind::Gauge);
        assert_eq!(
            desc.label_names(),
            &["channel_id", "stream", "video_id", "channel_name", "environment"]
        );

        assert!(descriptor("no_such_metric").is_none());
    }

    #[test]
    fn test_channel_subscribers_has_no_video_id() {
        let desc = descriptor(CHANNEL_SUBSCRIBERS).unwrap();
        assert!(!desc.label_names().contains(&LABEL_VIDEO_ID));
        assert_eq!(desc.label_names().len(), 3);
    }

    #[test]
    fn test_counters_share_stream_labels() {
        for name in [STREAM_CHECK_COUNT, STREAM_ERROR_COUNT, API_ERROR_COUNT] {
            let desc = descriptor(name).unwrap();
            assert_eq!(desc.kind, MetricKind::Counter);
            assert_eq!(desc.family, LabelFamily::Stream);
        }
    }

    #[test]
    fn test_info_records() {
        let channel = descriptor(CHANNEL_INFO).unwrap();
        assert_eq!(channel.kind, MetricKind::Info);
        assert_eq!(channel.label_names(), &["channel_id", "channel_name"]);
        assert!(!channel.is_numeric());

        let video = descriptor(VIDEO_INFO).unwrap();
        assert_eq!(video.label_names(), &["video_id", "channel_id", "stream"]);
    }

    #[test]
    fn test_exposition_type() {
        assert_eq!(MetricKind::Counter.exposition_type(), "counter");
        assert_eq!(MetricKind::Gauge.exposition_type(), "gauge");
        assert_eq!(MetricKind::Info.exposition_type(), "gauge");
    }

    #[test]
    fn test_metric_name_validation() {
        assert!(is_valid_metric_name("youtube_stream_status"));
        assert!(is_valid_metric_name("ns:metric"));
        assert!(!is_valid_metric_name("1metric"));
        assert!(!is_valid_metric_name("bad-name"));
        assert!(!is_valid_metric_name(""));
    }

    #[test]
    fn test_label_name_validation() {
        assert!(is_valid_label_name("channel_id"));
        assert!(!is_valid_label_name("__reserved"));
        assert!(!is_valid_label_name("with.dot"));
        assert!(!is_valid_label_name(""));
    }

    #[test]
    fn test_labels_insert_replaces() {
        let mut labels = Labels::new().with("a", "1").with("b", "2");
        labels.insert("a", "3");

        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get("a"), Some("3"));
        assert_eq!(labels.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_labels_matches_ignores_order() {
        let labels = Labels::new().with("b", "2").with("a", "1");
        assert!(labels.matches(&["a", "b"]));
        assert!(!labels.matches(&["a"]));
        assert!(!labels.matches(&["a", "b", "c"]));
        assert!(!labels.matches(&["a", "c"]));
    }
}
