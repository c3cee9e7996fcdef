use std::collections::HashMap;
use std::time::Duration;

use bon::Builder;
use kafka_source_builder::SetAtLeastOneBroker;
use rdkafka::Message as _;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, DefaultConsumerContext};
use thiserror::Error;
use tillflow::sources::{EventSource, SourceError};
use tillflow::types::RawEvent;
use tracing::{debug, info};

/// An [EventSource] streaming raw records from one Kafka topic.
///
/// Build it with [KafkaSource::builder]: every `.broker(..)` call adds an
/// address to `bootstrap.servers` (at least one is required), and any other
/// [librdkafka option](https://github.com/confluentinc/librdkafka/blob/master/CONFIGURATION.md)
/// can be passed through `.conf(key, value)`. Records carrying no payload
/// are skipped rather than emitted.
///
/// ```
/// use tillflow_kafka::KafkaSource;
///
/// let source = KafkaSource::builder()
///     .broker("kafka-0.internal:9092")
///     .broker("kafka-1.internal:9092")
///     .topic("till-events")
///     .group_id("tillflow-kpi")
///     .auto_offset_reset("latest")
///     .conf("security.protocol", "ssl")
///     .conf("statistics.interval.ms", "5000")
///     .build();
/// ```
#[derive(Builder)]
#[builder(on(String, into))]
pub struct KafkaSource {
    #[builder(field)]
    kafka_config: HashMap<String, String>,
    #[builder(field)]
    brokers: Vec<String>,
    /// unit marker set by `broker`, so `build` cannot be reached without one
    #[builder(overwritable, setters(vis = "", name = "at_least_one_broker"))]
    _at_least_one_broker: (),
    topic: String,
    group_id: String,
    #[builder(default = "earliest".to_owned())]
    auto_offset_reset: String,
    /// How long to back off when the broker has nothing for us
    #[builder(default = Duration::from_millis(100))]
    idle_backoff: Duration,
    #[builder(skip)]
    consumer: Option<BaseConsumer<DefaultConsumerContext>>,
}

impl<S: kafka_source_builder::State> KafkaSourceBuilder<S> {
    /// Provide an additional config for the Kafka consumer.
    /// Note that `bootstrap.servers`, `group.id` and `auto.offset.reset` configs are
    /// ignored. Use the respective builder methods to supply these
    pub fn conf(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.kafka_config.insert(key.into(), value.into());
        self
    }
    /// Add a broker URL to consume from
    pub fn broker(mut self, url: impl Into<String>) -> KafkaSourceBuilder<SetAtLeastOneBroker<S>> {
        self.brokers.push(url.into());
        self.at_least_one_broker(())
    }
}

impl KafkaSource {
    /// The subscribed consumer, created and subscribed on first use.
    /// Creation and subscription failures travel up as [SourceError],
    /// same as poll errors.
    fn consumer(&mut self) -> Result<&BaseConsumer<DefaultConsumerContext>, SourceError> {
        if self.consumer.is_none() {
            let mut kafka_conf = ClientConfig::new();
            for (k, v) in self.kafka_config.iter() {
                kafka_conf.set(k, v);
            }
            kafka_conf
                .set("group.id", &self.group_id)
                .set("bootstrap.servers", self.brokers.join(","))
                .set("auto.offset.reset", &self.auto_offset_reset);
            let consumer: BaseConsumer = kafka_conf
                .create()
                .map_err(|e| SourceError::new(KafkaConsumerError::CreateConsumer(e)))?;
            consumer
                .subscribe(&[&self.topic])
                .map_err(|e| SourceError::new(KafkaConsumerError::Subscribe(e)))?;
            info!(topic = %self.topic, "Subscribed to topic");
            self.consumer = Some(consumer);
        }
        #[allow(clippy::unwrap_used)]
        Ok(self.consumer.as_ref().unwrap())
    }
}

#[async_trait::async_trait]
impl EventSource for KafkaSource {
    async fn poll(&mut self) -> Result<Option<RawEvent>, SourceError> {
        let backoff = self.idle_backoff;
        match self.consumer()?.poll(Duration::ZERO) {
            None => {
                tokio::time::sleep(backoff).await;
                Ok(None)
            }
            Some(Err(e)) => Err(SourceError::new(KafkaConsumerError::Poll(e))),
            Some(Ok(msg)) => match msg.payload() {
                Some(payload) => Ok(Some(RawEvent {
                    payload: payload.to_vec(),
                    partition: Some(msg.partition()),
                    offset: Some(msg.offset()),
                })),
                None => {
                    debug!(
                        partition = msg.partition(),
                        offset = msg.offset(),
                        "Skipping record with empty payload"
                    );
                    Ok(None)
                }
            },
        }
    }

    // kafka is unbounded
    fn is_finished(&self) -> bool {
        false
    }
}

/// Possible errors which can occur in the Kafka consumer
#[derive(Debug, Error)]
pub enum KafkaConsumerError {
    #[error("Error polling Kafka consumer")]
    Poll(#[source] rdkafka::error::KafkaError),
    #[error("Failed to create Kafka consumer")]
    CreateConsumer(#[source] rdkafka::error::KafkaError),
    #[error("Failed to subscribe to topic")]
    Subscribe(#[source] rdkafka::error::KafkaError),
}

/// Incomplete builders must be rejected at compile time.
///
/// No broker was added:
/// ```compile_fail
/// use tillflow_kafka::KafkaSource;
/// KafkaSource::builder()
///     .topic("till-events")
///     .group_id("tillflow-kpi")
///     .build();
/// ```
///
/// No group id:
/// ```compile_fail
/// use tillflow_kafka::KafkaSource;
/// KafkaSource::builder()
///     .broker("kafka-0.internal:9092")
///     .topic("till-events")
///     .build();
/// ```
struct _CompileTests;
