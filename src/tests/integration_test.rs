#[tokio::test]
async fn integration_publish_consume_end_to_end() {
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::config::Settings;
    use crate::consume::{ConsumerOptions, handler_fn};
    use crate::publish::PublishOptions;
    use crate::service::{QueueClient, QueueService};

    let mut settings = Settings::default();
    settings.retry.base_delay_ms = 1;
    settings.consumer.drain_grace_secs = 1;
    let client = QueueClient::in_memory_with(settings);
    client.connect().await.expect("connect");

    let received = Arc::new(AtomicU32::new(0));
    let handler = {
        let received = received.clone();
        handler_fn(move |payload| {
            let received = received.clone();
            async move {
                assert_eq!(payload["topic"], "test");
                received.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };
    let handle = client
        .register_consumer("events", handler, ConsumerOptions::default())
        .await
        .expect("register consumer");

    for n in 0..5 {
        let result = client
            .publish(
                "events",
                json!({"topic": "test", "payload": format!("hello {n}")}),
                PublishOptions::default(),
            )
            .await
            .expect("publish");
        assert!(result.is_delivered());
    }

    let mut all_seen = false;
    for _ in 0..200 {
        if received.load(Ordering::SeqCst) == 5 {
            all_seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(all_seen, "consumer did not receive all published messages");

    client.unregister_consumer(&handle).await.expect("unregister");
    client.close().await;
}

#[tokio::test]
async fn integration_poison_message_reaches_dead_letter_queue() {
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use crate::config::Settings;
    use crate::consume::{ConsumerOptions, handler_fn};
    use crate::publish::PublishOptions;
    use crate::service::{QueueClient, QueueService};

    let mut settings = Settings::default();
    settings.retry.base_delay_ms = 1;
    settings.consumer.redelivery_limit = 1;
    settings.consumer.drain_grace_secs = 1;
    let client = QueueClient::in_memory_with(settings);

    // The work handler always fails; a second consumer watches the DLQ.
    client
        .register_consumer(
            "work",
            handler_fn(|_| async { Err("poison".into()) }),
            ConsumerOptions {
                dead_letter_queue: Some("work.dlq".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("register work consumer");

    let dead = Arc::new(AtomicU32::new(0));
    {
        let dead = dead.clone();
        client
            .register_consumer(
                "work.dlq",
                handler_fn(move |payload| {
                    let dead = dead.clone();
                    async move {
                        assert_eq!(payload["id"], 7);
                        dead.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                ConsumerOptions::default(),
            )
            .await
            .expect("register dlq consumer");
    }

    client
        .publish("work", json!({"id": 7}), PublishOptions::default())
        .await
        .expect("publish");

    let mut dead_lettered = false;
    for _ in 0..200 {
        if dead.load(Ordering::SeqCst) == 1 {
            dead_lettered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(dead_lettered, "poison message never reached the dead-letter queue");

    client.close().await;
}
