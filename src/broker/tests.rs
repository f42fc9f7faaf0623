use super::ClientId;
use super::Storage;
use super::message::ClientMessage;
use super::subscriber::{SubscribeOptions, Subscriber, period_from_secs};
use super::topic::{SendMode, TopicInfo};
use super::value::{TimestampedValue, Value};
use crate::client::outbound::{Outbound, ValueTarget};
use crate::utils::clock::MonotonicClock;
use serde_json::{Map, Value as Json, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    Announce {
        name: String,
        pubuid: Option<i64>,
    },
    Unannounce {
        name: String,
    },
    Properties {
        name: String,
        update: Map<String, Json>,
        ack: bool,
    },
    Value {
        name: String,
        value: Value,
        time: i64,
    },
    Period(Option<Duration>),
}

impl Sent {
    fn topic(&self) -> Option<&str> {
        match self {
            Sent::Announce { name, .. }
            | Sent::Unannounce { name }
            | Sent::Properties { name, .. }
            | Sent::Value { name, .. } => Some(name.as_str()),
            Sent::Period(_) => None,
        }
    }
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<Vec<Sent>>>);

impl Recorder {
    fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    /// Everything except meta topic traffic and period changes.
    fn take_user(&self) -> Vec<Sent> {
        self.take()
            .into_iter()
            .filter(|s| s.topic().is_some_and(|t| !t.starts_with('$')))
            .collect()
    }

    fn push(&self, sent: Sent) {
        self.0.lock().unwrap().push(sent);
    }
}

struct RecordingOutbound(Recorder);

impl Outbound for RecordingOutbound {
    fn announce(&mut self, topic: &TopicInfo, pubuid: Option<i64>) {
        self.0.push(Sent::Announce {
            name: topic.name.clone(),
            pubuid,
        });
    }

    fn unannounce(&mut self, name: &str, _id: i64) {
        self.0.push(Sent::Unannounce {
            name: name.to_string(),
        });
    }

    fn properties(&mut self, name: &str, update: &Map<String, Json>, ack: bool) {
        self.0.push(Sent::Properties {
            name: name.to_string(),
            update: update.clone(),
            ack,
        });
    }

    fn send_value(&mut self, target: ValueTarget<'_>, value: &TimestampedValue, _mode: SendMode) {
        self.0.push(Sent::Value {
            name: target.name.to_string(),
            value: value.value.clone(),
            time: value.time,
        });
    }

    fn send_values_now(&mut self, values: &[(ValueTarget<'_>, &TimestampedValue)]) {
        for (target, value) in values {
            self.send_value(*target, value, SendMode::Normal);
        }
    }

    fn flush(&mut self) {}

    fn set_period(&mut self, period: Option<Duration>) {
        self.0.push(Sent::Period(period));
    }
}

fn storage() -> Storage {
    Storage::new(Arc::new(MonotonicClock::new()))
}

fn connect(storage: &mut Storage, name: &str) -> (ClientId, Recorder) {
    let recorder = Recorder::default();
    let (id, _) = storage.add_client(
        name,
        "127.0.0.1:1",
        false,
        Box::new(RecordingOutbound(recorder.clone())),
        None,
    );
    (id, recorder)
}

fn props(value: Json) -> Map<String, Json> {
    value.as_object().cloned().unwrap_or_default()
}

fn prefixes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn announce(name: &str, pubuid: Option<i64>) -> Sent {
    Sent::Announce {
        name: name.to_string(),
        pubuid,
    }
}

fn value(name: &str, value: Value, time: i64) -> Sent {
    Sent::Value {
        name: name.to_string(),
        value,
        time,
    }
}

fn meta_payload(storage: &Storage, name: &str) -> Json {
    let topic = storage.topic_by_name(name).unwrap();
    match &topic.last_value.as_ref().unwrap().value {
        Value::Raw(bytes) => rmp_serde::from_slice(bytes).unwrap(),
        other => panic!("unexpected meta value {other:?}"),
    }
}

#[test]
fn test_prefix_match() {
    let sub = Subscriber::new(1, prefixes(&["a/", "b/c"]), SubscribeOptions::default());
    assert!(sub.matches("a/x", false));
    assert!(sub.matches("b/c", false));
    assert!(sub.matches("b/cd", false));
    assert!(!sub.matches("b/d", false));
}

#[test]
fn test_exact_match_when_prefix_disabled() {
    let options = SubscribeOptions {
        prefix: false,
        ..SubscribeOptions::default()
    };
    let sub = Subscriber::new(1, prefixes(&["b/c"]), options);
    assert!(sub.matches("b/c", false));
    assert!(!sub.matches("b/cd", false));
}

#[test]
fn test_special_topics_need_meta_or_dollar_prefix() {
    let all = Subscriber::new(1, prefixes(&[""]), SubscribeOptions::default());
    assert!(!all.matches("$clients", true));

    let meta = Subscriber::new(
        2,
        prefixes(&[""]),
        SubscribeOptions {
            meta: true,
            ..SubscribeOptions::default()
        },
    );
    assert!(meta.matches("$clients", true));

    let dollar = Subscriber::new(3, prefixes(&["$"]), SubscribeOptions::default());
    assert!(dollar.matches("$clients", true));
}

#[test]
fn test_period_rounding() {
    assert_eq!(period_from_secs(0.1), Duration::from_millis(100));
    assert_eq!(period_from_secs(0.016), Duration::from_millis(20));
    assert_eq!(period_from_secs(0.004), Duration::from_millis(5));
    assert_eq!(period_from_secs(0.0), Duration::from_millis(5));
    assert_eq!(period_from_secs(f64::NAN), Duration::from_millis(5));
}

#[test]
fn test_huge_period_is_clamped() {
    let max = Duration::from_secs(3600);
    assert_eq!(period_from_secs(1e17), max);
    assert_eq!(period_from_secs(f64::MAX), max);
    assert_eq!(period_from_secs(f64::INFINITY), max);

    let mut s = storage();
    let (b, _rec_b) = connect(&mut s, "B");
    for (subuid, periodic) in [(1, 1e17), (2, f64::MAX)] {
        let options = SubscribeOptions {
            periodic,
            ..SubscribeOptions::default()
        };
        s.client_subscribe(b, subuid, prefixes(&["/"]), options);
    }
    assert_eq!(s.client(b).unwrap().period(), Some(max));
}

#[test]
fn test_options_defaults_from_json() {
    let options: SubscribeOptions = serde_json::from_value(json!({"topicsonly": true})).unwrap();
    assert!(options.topics_only);
    assert!(options.prefix);
    assert_eq!(options.periodic, 0.1);
}

#[test]
fn test_period_negotiation() {
    let mut s = storage();
    let (a, rec) = connect(&mut s, "A");

    let slow = SubscribeOptions {
        periodic: 0.1,
        ..SubscribeOptions::default()
    };
    let fast = SubscribeOptions {
        periodic: 0.02,
        ..SubscribeOptions::default()
    };
    s.client_subscribe(a, 1, prefixes(&["/"]), slow);
    assert_eq!(s.client(a).unwrap().period(), Some(Duration::from_millis(100)));
    s.client_subscribe(a, 2, prefixes(&["/fast"]), fast);
    assert_eq!(s.client(a).unwrap().period(), Some(Duration::from_millis(20)));
    s.client_unsubscribe(a, 2);
    assert_eq!(s.client(a).unwrap().period(), Some(Duration::from_millis(100)));
    s.client_unsubscribe(a, 1);
    assert_eq!(s.client(a).unwrap().period(), None);

    let periods: Vec<Sent> = rec
        .take()
        .into_iter()
        .filter(|s| matches!(s, Sent::Period(_)))
        .collect();
    assert_eq!(
        periods,
        vec![
            Sent::Period(Some(Duration::from_millis(100))),
            Sent::Period(Some(Duration::from_millis(20))),
            Sent::Period(Some(Duration::from_millis(100))),
            Sent::Period(None),
        ]
    );
}

#[test]
fn test_robot_speed_end_to_end() {
    let mut s = storage();
    let (a, rec_a) = connect(&mut s, "A");
    let (b, rec_b) = connect(&mut s, "B");

    s.client_subscribe(b, 1, prefixes(&["/robot/"]), SubscribeOptions::default());
    assert!(rec_b.take_user().is_empty());

    s.client_publish(a, 7, "/robot/speed", "double", Map::new());
    assert_eq!(rec_a.take_user(), vec![announce("/robot/speed", Some(7))]);
    assert_eq!(rec_b.take_user(), vec![announce("/robot/speed", None)]);

    s.client_set_value(a, 7, TimestampedValue::new(Value::Double(3.5), 10));
    assert_eq!(
        rec_b.take_user(),
        vec![value("/robot/speed", Value::Double(3.5), 10)]
    );
    assert!(rec_a.take_user().is_empty());

    let topic = s.topic_by_name("/robot/speed").unwrap();
    assert_eq!(
        topic.last_value,
        Some(TimestampedValue::new(Value::Double(3.5), 10))
    );
}

#[test]
fn test_late_subscriber_gets_announce_then_value() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, rec_b) = connect(&mut s, "B");

    s.client_publish(a, 1, "/x", "double", Map::new());
    s.client_set_value(a, 1, TimestampedValue::new(Value::Double(1.0), 5));
    s.client_subscribe(b, 1, prefixes(&[""]), SubscribeOptions::default());

    assert_eq!(
        rec_b.take_user(),
        vec![announce("/x", None), value("/x", Value::Double(1.0), 5)]
    );
}

#[test]
fn test_topics_only_gets_no_values() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, rec_b) = connect(&mut s, "B");

    s.client_publish(a, 1, "/x", "int", Map::new());
    s.client_set_value(a, 1, TimestampedValue::new(Value::Int(1), 5));
    let options = SubscribeOptions {
        topics_only: true,
        ..SubscribeOptions::default()
    };
    s.client_subscribe(b, 1, prefixes(&["/"]), options);
    s.client_set_value(a, 1, TimestampedValue::new(Value::Int(2), 6));

    assert_eq!(rec_b.take_user(), vec![announce("/x", None)]);
    let topic = s.topic_by_name("/x").unwrap();
    assert_eq!(topic.clients[&b].send_mode, SendMode::Disabled);
}

#[test]
fn test_send_mode_follows_strongest_subscriber() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, _rec_b) = connect(&mut s, "B");
    s.client_publish(a, 1, "/x", "int", Map::new());

    s.client_subscribe(b, 1, prefixes(&["/"]), SubscribeOptions::default());
    assert_eq!(s.topic_by_name("/x").unwrap().clients[&b].send_mode, SendMode::Normal);

    let all = SubscribeOptions {
        all: true,
        ..SubscribeOptions::default()
    };
    s.client_subscribe(b, 2, prefixes(&["/x"]), all);
    assert_eq!(s.topic_by_name("/x").unwrap().clients[&b].send_mode, SendMode::All);

    s.client_unsubscribe(b, 2);
    assert_eq!(s.topic_by_name("/x").unwrap().clients[&b].send_mode, SendMode::Normal);
}

#[test]
fn test_second_subscriber_does_not_resend_queued_value() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, rec_b) = connect(&mut s, "B");

    let all = SubscribeOptions {
        all: true,
        ..SubscribeOptions::default()
    };
    s.client_subscribe(b, 1, prefixes(&["/x"]), all);
    s.client_publish(a, 1, "/x", "int", Map::new());
    s.client_set_value(a, 1, TimestampedValue::new(Value::Int(1), 5));
    s.client_set_value(a, 1, TimestampedValue::new(Value::Int(2), 6));
    rec_b.take();

    s.client_subscribe(b, 2, prefixes(&["/x"]), SubscribeOptions::default());
    assert!(rec_b.take_user().is_empty());

    // a topic that is new to the client still gets its current value
    s.client_publish(a, 2, "/y", "int", Map::new());
    s.client_set_value(a, 2, TimestampedValue::new(Value::Int(3), 7));
    s.client_subscribe(b, 3, prefixes(&["/y"]), SubscribeOptions::default());
    assert_eq!(
        rec_b.take_user(),
        vec![announce("/y", None), value("/y", Value::Int(3), 7)]
    );
}

#[test]
fn test_replacing_subscription_announces_only_new_topics() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, rec_b) = connect(&mut s, "B");

    s.client_publish(a, 1, "/a/x", "int", Map::new());
    s.client_publish(a, 2, "/b/y", "int", Map::new());
    s.client_subscribe(b, 1, prefixes(&["/a"]), SubscribeOptions::default());
    assert_eq!(rec_b.take_user(), vec![announce("/a/x", None)]);

    s.client_subscribe(b, 1, prefixes(&["/a", "/b"]), SubscribeOptions::default());
    assert_eq!(rec_b.take_user(), vec![announce("/b/y", None)]);
    assert_eq!(s.client(b).unwrap().subscriber(1).unwrap().prefixes.len(), 2);
}

#[test]
fn test_idempotent_unpublish() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, rec_b) = connect(&mut s, "B");
    s.client_subscribe(b, 1, prefixes(&[""]), SubscribeOptions::default());
    let before = s.topic_count();

    s.client_publish(a, 1, "/x", "int", Map::new());
    rec_b.take();
    s.client_unpublish(a, 1);
    s.client_unpublish(a, 1);

    assert!(s.get_topic("/x").is_none());
    assert!(s.get_topic("$pub$/x").is_none());
    assert_eq!(s.topic_count(), before);
    assert_eq!(
        rec_b.take_user(),
        vec![Sent::Unannounce {
            name: "/x".to_string()
        }]
    );
}

#[test]
fn test_topic_deleted_after_last_publisher() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, _rec_b) = connect(&mut s, "B");

    s.client_publish(a, 1, "/x", "int", Map::new());
    s.client_publish(b, 1, "/x", "int", Map::new());
    s.client_unpublish(a, 1);
    assert!(s.get_topic("/x").is_some());
    s.client_unpublish(b, 1);
    assert!(s.get_topic("/x").is_none());
}

#[test]
fn test_retained_topic_outlives_publisher_until_flag_removed() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (c, rec_c) = connect(&mut s, "C");

    s.client_publish(a, 1, "/r", "int", props(json!({"retained": true})));
    s.client_unpublish(a, 1);
    assert!(s.get_topic("/r").is_some());

    s.client_subscribe(c, 1, prefixes(&["/r"]), SubscribeOptions::default());
    assert_eq!(rec_c.take_user(), vec![announce("/r", None)]);

    s.client_set_properties(a, "/r", &props(json!({"retained": null})));
    assert!(s.get_topic("/r").is_none());
    assert_eq!(
        rec_c.take_user(),
        vec![Sent::Unannounce {
            name: "/r".to_string()
        }]
    );
}

#[test]
fn test_null_property_deletes_key() {
    let mut s = storage();
    let (a, rec_a) = connect(&mut s, "A");
    let (b, rec_b) = connect(&mut s, "B");

    s.client_publish(a, 1, "/p", "int", props(json!({"bar": 2})));
    s.client_subscribe(b, 1, prefixes(&["/p"]), SubscribeOptions::default());
    rec_a.take();
    rec_b.take();

    let update = props(json!({"foo": 1, "bar": null}));
    s.client_set_properties(a, "/p", &update);

    let topic = s.topic_by_name("/p").unwrap();
    assert_eq!(Json::Object(topic.properties.clone()), json!({"foo": 1}));
    assert!(!topic.properties.contains_key("bar"));
    assert_eq!(
        rec_a.take_user(),
        vec![Sent::Properties {
            name: "/p".to_string(),
            update: update.clone(),
            ack: true
        }]
    );
    assert_eq!(
        rec_b.take_user(),
        vec![Sent::Properties {
            name: "/p".to_string(),
            update,
            ack: false
        }]
    );
}

#[test]
fn test_set_properties_on_unknown_topic_is_ignored() {
    let mut s = storage();
    let (a, rec_a) = connect(&mut s, "A");
    let before = s.topic_count();
    s.client_set_properties(a, "/missing", &props(json!({"x": 1})));
    assert_eq!(s.topic_count(), before);
    assert!(rec_a.take_user().is_empty());
}

#[test]
fn test_client_cannot_write_meta_topic() {
    let mut s = storage();
    let (a, rec_a) = connect(&mut s, "A");

    s.client_publish(a, 1, "$clients", "msgpack", Map::new());
    assert!(rec_a.take().contains(&announce("$clients", Some(1))));

    let before = s.topic_by_name("$clients").unwrap().last_value.clone();
    s.client_set_value(a, 1, TimestampedValue::new(Value::Raw(vec![1, 2]), 5));
    assert_eq!(s.topic_by_name("$clients").unwrap().last_value, before);

    s.client_set_properties(a, "$clients", &props(json!({"retained": null})));
    assert!(s.get_topic("$clients").is_some());
}

#[test]
fn test_duplicate_pubuid_keeps_first_publisher() {
    let mut s = storage();
    let (a, rec_a) = connect(&mut s, "A");

    s.client_publish(a, 1, "/x", "int", Map::new());
    rec_a.take();
    s.client_publish(a, 1, "/y", "int", Map::new());

    assert!(s.get_topic("/y").is_none());
    assert_eq!(
        s.client(a).unwrap().publisher(1).unwrap().topic,
        s.get_topic("/x").unwrap()
    );
    assert!(rec_a.take_user().is_empty());
}

#[test]
fn test_unknown_publisher_value_is_ignored() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    s.client_set_value(a, 99, TimestampedValue::new(Value::Int(1), 1));
    assert!(s.list_topics().iter().all(|t| t.name.starts_with('$')));
}

#[test]
fn test_zero_timestamp_uses_server_clock() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    s.client_publish(a, 1, "/x", "boolean", Map::new());
    s.client_set_value(a, 1, TimestampedValue::new(Value::Boolean(true), 0));
    let last = s.topic_by_name("/x").unwrap().last_value.clone().unwrap();
    assert!(last.time > 0);
}

#[test]
fn test_last_value_is_last_applied() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    s.client_publish(a, 1, "/x", "int", Map::new());
    s.client_set_value(a, 1, TimestampedValue::new(Value::Int(1), 100));
    s.client_set_value(a, 1, TimestampedValue::new(Value::Int(2), 50));
    assert_eq!(
        s.topic_by_name("/x").unwrap().last_value,
        Some(TimestampedValue::new(Value::Int(2), 50))
    );
}

#[test]
fn test_publisher_does_not_get_own_values() {
    let mut s = storage();
    let (a, rec_a) = connect(&mut s, "A");
    s.client_subscribe(a, 1, prefixes(&[""]), SubscribeOptions::default());
    s.client_publish(a, 1, "/x", "int", Map::new());
    s.client_set_value(a, 1, TimestampedValue::new(Value::Int(1), 1));
    assert_eq!(rec_a.take_user(), vec![announce("/x", Some(1))]);
}

#[test]
fn test_delete_topic_refuses_published_topic() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    s.client_publish(a, 1, "/x", "int", Map::new());
    let published = s.get_topic("/x").unwrap();
    assert!(!s.delete_topic(published));

    let server_owned = s.create_topic(None, "/server", "int", Map::new(), false);
    assert!(s.delete_topic(server_owned));
    assert!(s.get_topic("/server").is_none());
    assert!(s.get_topic("$pub$/server").is_none());
}

#[test]
fn test_for_each_topic_in_name_order() {
    let mut s = storage();
    s.create_topic(None, "/b", "int", Map::new(), false);
    s.create_topic(None, "/a", "int", Map::new(), false);
    let mut names = Vec::new();
    s.for_each_topic(|_, topic| {
        if !topic.special {
            names.push(topic.name.clone());
        }
    });
    assert_eq!(names, vec!["/a".to_string(), "/b".to_string()]);
}

#[test]
fn test_client_names_are_deduplicated() {
    let mut s = storage();
    let (a, _) = connect(&mut s, "dash");
    let (b, _) = connect(&mut s, "dash");
    let (c, _) = connect(&mut s, "dash@7");
    let (d, _) = connect(&mut s, "");
    assert_eq!(s.client(a).unwrap().name(), "dash");
    assert_eq!(s.client(b).unwrap().name(), "dash@1");
    assert_eq!(s.client(c).unwrap().name(), "dash@2");
    assert_eq!(s.client(d).unwrap().name(), "NT4");
}

#[test]
fn test_disconnect_tears_down_client() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, rec_b) = connect(&mut s, "B");
    s.client_publish(a, 1, "/x", "int", Map::new());
    s.client_subscribe(b, 1, prefixes(&[""]), SubscribeOptions::default());
    rec_b.take();

    s.remove_client(a);

    assert!(s.client(a).is_none());
    assert!(s.get_topic("/x").is_none());
    assert!(s.get_topic("$clientpub$A").is_none());
    assert!(s.get_topic("$clientsub$A").is_none());
    assert_eq!(
        rec_b.take_user(),
        vec![Sent::Unannounce {
            name: "/x".to_string()
        }]
    );
    assert_eq!(
        meta_payload(&s, "$clients"),
        json!([{"id": "B", "conn": "127.0.0.1:1", "ver": 1025}])
    );
}

#[test]
fn test_meta_topics_describe_publishers_and_subscribers() {
    let mut s = storage();
    let (a, _rec_a) = connect(&mut s, "A");
    let (b, _rec_b) = connect(&mut s, "B");
    s.client_publish(a, 3, "/x", "int", Map::new());
    s.client_subscribe(b, 4, prefixes(&["/x"]), SubscribeOptions::default());
    s.refresh_meta();

    assert_eq!(
        meta_payload(&s, "$pub$/x"),
        json!([{"client": "A", "pubuid": 3}])
    );
    assert_eq!(
        meta_payload(&s, "$sub$/x"),
        json!([{"client": "B", "subuid": 4, "options": {}}])
    );
    assert_eq!(
        meta_payload(&s, "$clientpub$A"),
        json!([{"uid": 3, "topic": "/x"}])
    );
    assert_eq!(
        meta_payload(&s, "$clientsub$B"),
        json!([{"uid": 4, "topics": ["/x"], "options": {}}])
    );

    let clients_topic = s.topic_by_name("$clients").unwrap();
    assert!(clients_topic.special);
    assert_eq!(clients_topic.type_str, "msgpack");
    assert_eq!(clients_topic.properties.get("retained"), Some(&json!(true)));
}

#[test]
fn test_meta_refreshed_once_per_batch() {
    let mut s = storage();
    let (c, rec_c) = connect(&mut s, "C");
    s.client_subscribe(c, 1, prefixes(&["$clientpub$"]), SubscribeOptions::default());

    let (tx, rx) = mpsc::channel(16);
    let rec_a = Recorder::default();
    let (a, _) = s.add_client(
        "A",
        "127.0.0.1:2",
        false,
        Box::new(RecordingOutbound(rec_a)),
        Some(rx),
    );
    rec_c.take();

    for i in 1..=3 {
        tx.try_send(ClientMessage::Publish {
            name: format!("/t{i}"),
            pubuid: i,
            type_str: "int".to_string(),
            properties: Map::new(),
        })
        .unwrap();
    }
    assert!(!s.process_incoming(a, 16));

    let updates: Vec<Sent> = rec_c
        .take()
        .into_iter()
        .filter(|sent| matches!(sent, Sent::Value { name, .. } if name == "$clientpub$A"))
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(
        meta_payload(&s, "$clientpub$A").as_array().map(Vec::len),
        Some(3)
    );
}

#[test]
fn test_process_incoming_reports_full_batch() {
    let mut s = storage();
    let (tx, rx) = mpsc::channel(16);
    let (a, _) = s.add_client(
        "A",
        "127.0.0.1:2",
        false,
        Box::new(RecordingOutbound(Recorder::default())),
        Some(rx),
    );
    for subuid in 1..=3 {
        tx.try_send(ClientMessage::Subscribe {
            subuid,
            topics: prefixes(&["/"]),
            options: SubscribeOptions::default(),
        })
        .unwrap();
    }

    assert!(s.process_incoming(a, 2));
    assert!(!s.process_incoming(a, 2));
    assert!(s.client(a).unwrap().subscriber(3).is_some());
}
