//! Identity of one monitored (channel, video) pair.

use crate::schema::{
    LABEL_CHANNEL_ID, LABEL_CHANNEL_NAME, LABEL_ENVIRONMENT, LABEL_STREAM, LABEL_VIDEO_ID,
    LabelFamily, Labels,
};

/// Environment label used when a stream does not configure one.
pub const DEFAULT_ENVIRONMENT: &str = "Production";

/// One monitored stream. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntity {
    pub channel_id: String,
    pub video_id: String,
    pub stream_name: String,
    pub channel_name: String,
    pub environment: String,
    pub api_key: String,
}

impl StreamEntity {
    /// Key identifying the entity in the registry's set of initialized streams.
    pub fn key(&self) -> String {
        format!("{}_{}_{}", self.channel_id, self.video_id, self.stream_name)
    }

    /// The label tuple of this entity for a metric family.
    pub fn labels(&self, family: LabelFamily) -> Labels {
        match family {
            LabelFamily::Status => self
                .labels(LabelFamily::Stream)
                .with(LABEL_ENVIRONMENT, &self.environment),
            LabelFamily::Stream => Labels::new()
                .with(LABEL_CHANNEL_ID, &self.channel_id)
                .with(LABEL_STREAM, &self.stream_name)
                .with(LABEL_VIDEO_ID, &self.video_id)
                .with(LABEL_CHANNEL_NAME, &self.channel_name),
            LabelFamily::Channel => Labels::new()
                .with(LABEL_CHANNEL_ID, &self.channel_id)
                .with(LABEL_STREAM, &self.stream_name)
                .with(LABEL_CHANNEL_NAME, &self.channel_name),
            LabelFamily::ChannelInfo => Labels::new()
                .with(LABEL_CHANNEL_ID, &self.channel_id)
                .with(LABEL_CHANNEL_NAME, &self.channel_name),
            LabelFamily::VideoInfo => Labels::new()
                .with(LABEL_VIDEO_ID, &self.video_id)
                .with(LABEL_CHANNEL_ID, &self.channel_id)
                .with(LABEL_STREAM, &self.stream_name),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_entity(stream: &str) -> StreamEntity {
    StreamEntity {
        channel_id: format!("UC-{}", stream),
        video_id: format!("vid-{}", stream),
        stream_name: stream.to_string(),
        channel_name: format!("{} channel", stream),
        environment: DEFAULT_ENVIRONMENT.to_string(),
        api_key: "test-key".to_string(),
    }
}
