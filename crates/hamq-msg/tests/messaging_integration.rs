//! ---
//! hamq_section: "02-messaging-ipc-data-model"
//! hamq_subsection: "module"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Message schema helpers, codecs and transport contracts."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use hamq_common::config::EndpointConfig;
use hamq_msg::{
    CorrelationId, InMemoryBroker, JobInformation, MemoryConnector, Order, OutboundMessage,
    QueueConnector, WireCodec,
};

#[tokio::test]
async fn encoded_job_survives_the_memory_transport() -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();
    let connector = MemoryConnector::new(broker.clone());
    let endpoint = EndpointConfig::new("memory://west", "job-queue");
    let producer = connector.connect(&endpoint).await?;
    let consumer = connector.connect(&endpoint).await?;
    let codec = WireCodec::default();

    let id = CorrelationId::new();
    let job = JobInformation::new(id);
    producer
        .send(OutboundMessage::new(codec.encode_record(&job)?, id))
        .await?;

    let delivery = consumer.receive().await?;
    assert_eq!(delivery.properties.correlation_id()?, id);
    let decoded: JobInformation = codec.decode_record(&delivery.body)?;
    assert_eq!(decoded, job);
    consumer.acknowledge(&delivery.lock_token).await?;
    assert_eq!(broker.completed("west", "job-queue"), 1);
    Ok(())
}

#[tokio::test]
async fn queues_are_isolated_per_namespace() -> anyhow::Result<()> {
    let broker = InMemoryBroker::new();
    let connector = MemoryConnector::new(broker.clone());
    let west = connector
        .connect(&EndpointConfig::new("memory://west", "job-queue"))
        .await?;
    let codec = WireCodec::default();

    let id = CorrelationId::new();
    let order = Order::new(id, "isolated").with_detail("SKU-9", "bolt", 3, 0.25);
    west.send(OutboundMessage::new(codec.encode_record(&order)?, id))
        .await?;

    assert_eq!(broker.pending("west", "job-queue"), 1);
    assert_eq!(broker.pending("east", "job-queue"), 0);
    assert_eq!(broker.send_attempts("east"), 0);
    Ok(())
}
