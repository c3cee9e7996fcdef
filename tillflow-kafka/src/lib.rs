//! Kafka source for tillflow jobs.
mod source;

pub use source::{KafkaConsumerError, KafkaSource};
