use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value as JsonValue};
use uinl_core::{
    address, ClassSpec, Config, Engine, Family, NodeId, Outbox, TriggerMode,
};

fn approx(a: f64, b: f64, eps: f64) {
    assert!((a - b).abs() <= eps, "left={a} right={b} eps={eps}");
}

fn engine() -> Engine<Outbox> {
    Engine::new(Config::default(), Outbox::new())
}

fn find(engine: &Engine<Outbox>, address: JsonValue) -> NodeId {
    engine
        .find(&address)
        .unwrap_or_else(|| panic!("no node at {address}"))
}

fn value_at(engine: &Engine<Outbox>, address: JsonValue) -> JsonValue {
    let id = find(engine, address);
    engine.node(id).expect("live").value().clone()
}

fn prop_at(engine: &Engine<Outbox>, address: JsonValue, name: &str) -> Option<JsonValue> {
    let id = find(engine, address);
    engine.node(id).expect("live").property(name).cloned()
}

/// Outbound messages with the timestamp stripped.
fn sent(engine: &mut Engine<Outbox>) -> Vec<JsonValue> {
    engine
        .transport_mut()
        .drain()
        .into_iter()
        .map(|mut m| {
            m.as_object_mut().expect("object message").remove("u");
            m
        })
        .collect()
}

#[test]
fn address_round_trips_on_unchanged_tree() {
    let mut e = engine();
    e.receive(json!([
        {"id": "menu", "v": [
            {"v": [{"id": "item", "v": "a"}, {"id": "item", "v": "b"}]},
            {"id": "solo", "v": "c"}
        ]},
        {"v": [{"v": [{"v": 1}]}]}
    ]));
    let root = e.root();
    let every = e.tree().descendants(root);
    assert_eq!(every.len(), 8);
    for node in every {
        let addr = e.address_of(node).expect("address");
        assert_eq!(e.find(&addr.to_json()), Some(node), "address {addr}");
    }
}

#[test]
fn unique_id_address_is_the_id() {
    let mut e = engine();
    e.receive(json!([{"v": [{"v": [{"id": "deep", "v": "x"}]}]}]));
    let deep = find(&e, json!("deep"));
    assert_eq!(e.address_of(deep).expect("address").to_json(), json!("deep"));

    e.receive(json!({"v": [{"id": "deep", "v": "y"}]}));
    let deep = find(&e, json!([0, 0, "deep"]));
    assert!(e.address_of(deep).expect("address").to_json().is_array());
}

#[test]
fn defaults_are_deep_copies() {
    let mut e = engine();
    e.receive(json!({"df": {"style": {"color": "red"}}, "v": [{"id": "a", "v": "1"}, {"id": "b", "v": "2"}]}));
    e.receive(json!({"_": "a", "style": {"color": "blue"}}));
    assert_eq!(prop_at(&e, json!("a"), "style"), Some(json!({"color": "blue"})));
    assert_eq!(prop_at(&e, json!("b"), "style"), Some(json!({"color": "red"})));
}

#[test]
fn incompatible_value_recreates_at_same_index() {
    let mut e = engine();
    e.receive(json!([{"v": "x"}, {"id": "n", "v": 3, "w": 7}, {"v": "z"}]));
    let before = find(&e, json!("n"));
    e.receive(json!({"_": "n", "v": "three"}));
    let after = find(&e, json!("n"));
    assert_ne!(before, after);
    assert!(e.node(before).is_none());
    let node = e.node(after).expect("live");
    assert_eq!(node.class(), "txt");
    assert_eq!(node.value(), &json!("three"));
    assert_eq!(node.property("w"), Some(&json!(7)));
    assert_eq!(e.tree().index_of(after), Some(1));
}

#[test]
fn delay_applies_after_two_seconds_and_cancel_prevents_it() {
    let mut e = engine();
    e.receive(json!([{"id": "t", "v": "before"}]));
    e.receive(json!({"_": "t", "v": "after", "Td": 2, "T": "later"}));
    e.tick(1999.0);
    assert_eq!(value_at(&e, json!("t")), json!("before"));
    e.tick(1.0);
    assert_eq!(value_at(&e, json!("t")), json!("after"));

    e.receive(json!({"_": "t", "v": "never", "Td": 2, "T": "later"}));
    e.tick(1000.0);
    e.receive(json!({"Tc": "later"}));
    e.tick(5000.0);
    assert_eq!(value_at(&e, json!("t")), json!("after"));
    assert!(e.scheduler().is_empty());
}

#[test]
fn wildcard_cancel_drops_every_pending_schedule() {
    for wildcard in [json!({}), json!(""), json!("*")] {
        let mut e = engine();
        e.receive(json!([{"id": "b", "C": "btn"}, {"id": "n", "v": 0}]));
        e.receive(json!({"_": "n", "Tr": {"_": "b"}, "v": 1}));
        e.receive(json!({"_": "n", "Td": 1, "v": 2}));
        e.receive(json!({"_": "n", "Ti": 1, "v": 3}));
        assert_eq!(value_at(&e, json!("n")), json!(3));
        assert_eq!(e.scheduler().len(), 3);

        e.receive(json!({"Tc": wildcard}));
        assert!(e.scheduler().is_empty(), "{wildcard}");
        e.receive(json!({"_": "n", "v": 0}));
        let b = find(&e, json!("b"));
        e.user_event(b, "v", json!(true));
        e.tick(5000.0);
        assert_eq!(value_at(&e, json!("n")), json!(0), "{wildcard}");
    }
}

#[test]
fn named_trigger_cancel() {
    let mut e = engine();
    e.receive(json!([{"id": "b", "C": "btn"}, {"id": "n", "v": 0}]));
    e.receive(json!({"_": "n", "Tr": {"_": "b"}, "T": "watch", "v": 7}));
    e.receive(json!({"_": "n", "Td": 1, "T": "other", "v": 8}));
    assert!(e.scheduler().contains("watch"));
    e.receive(json!({"Tc": "watch"}));
    assert!(!e.scheduler().contains("watch"));
    assert!(e.scheduler().contains("other"));

    let b = find(&e, json!("b"));
    e.user_event(b, "v", json!(true));
    assert_eq!(value_at(&e, json!("n")), json!(0));
    e.tick(1000.0);
    assert_eq!(value_at(&e, json!("n")), json!(8));
}

#[test]
fn recreated_container_keeps_defaults() {
    let mut e = engine();
    e.register_class(ClassSpec::new("panel", Family::Sequence));
    e.receive(json!([{"id": "box", "df": {"w": 3}, "v": [{"id": "early"}]}]));
    assert_eq!(prop_at(&e, json!("early"), "w"), Some(json!(3)));
    sent(&mut e);

    e.receive(json!({"_": "box", "R": ["df"]}));
    assert_eq!(sent(&mut e), vec![json!({"_": "box", "df": {"w": 3}})]);

    e.receive(json!({"_": "box", "C": "panel"}));
    let boxed = find(&e, json!("box"));
    assert_eq!(e.node(boxed).expect("live").class(), "panel");
    e.receive(json!({"_": "box", "v": [{"id": "late"}]}));
    assert_eq!(prop_at(&e, json!("late"), "w"), Some(json!(3)));
}

#[test]
fn delay_until_uses_absolute_clock() {
    let mut e = engine();
    e.receive(json!([{"id": "t", "v": 0}]));
    e.tick(500.0);
    e.receive(json!({"_": "t", "v": 1, "Tu": 1500}));
    e.tick(999.0);
    assert_eq!(value_at(&e, json!("t")), json!(0));
    e.tick(1.0);
    assert_eq!(value_at(&e, json!("t")), json!(1));
}

#[test]
fn interval_applies_fresh_copies() {
    let mut e = engine();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    e.register_reaction("bin", "v", move |_, v| {
        log.borrow_mut().push(v.clone());
        Ok(())
    });
    e.receive(json!([{"id": "list", "v": []}]));
    seen.borrow_mut().clear();
    e.receive(json!({"_": "list", "Ti": 1, "v": [{"v": "row", "style": {"n": 1}}]}));
    e.tick(3500.0);
    assert_eq!(seen.borrow().len(), 4);
    assert!(seen
        .borrow()
        .iter()
        .all(|v| v == &json!([{"v": "row", "style": {"n": 1}}])));
    let list = find(&e, json!("list"));
    assert_eq!(e.node(list).expect("live").children().len(), 4);
}

#[test]
fn bounded_animation_stops_exactly_at_max() {
    let mut e = engine();
    e.receive(json!([{"id": "x", "v": 0, "pos": 5}]));
    e.receive(json!({"_": "x", "+pos~": {"min": 0, "max": 10}, "+pos": 20}));
    let node = find(&e, json!("x"));
    let mut finished_at = None;
    for _ in 0..30 {
        e.tick(10.0);
        let pos = e
            .node(node)
            .and_then(|n| n.property("pos"))
            .and_then(JsonValue::as_f64)
            .expect("pos");
        assert!(pos <= 10.0, "pos {pos} overshot");
        if finished_at.is_none() && e.animator().is_empty() {
            finished_at = Some(e.now_ms());
        }
    }
    approx(finished_at.expect("finished"), 250.0, 1e-9);
    assert_eq!(prop_at(&e, json!("x"), "pos"), Some(json!(10)));
    assert_eq!(prop_at(&e, json!("x"), "+pos"), Some(json!(0)));
    let out = sent(&mut e);
    assert_eq!(out, vec![json!({"_": "x", "pos": 10, "+pos": 0})]);
}

#[test]
fn quantized_animation_propagates_whole_steps() {
    let mut e = engine();
    e.receive(json!([{"id": "q", "v": 0, "on": {"v": true}}]));
    e.receive(json!({"_": "q", "+v~": {"step": 1}, "+v": 2}));
    let mut times = Vec::new();
    for _ in 0..100 {
        e.tick(1000.0 / 60.0);
        for msg in sent(&mut e) {
            times.push((e.now_ms(), msg["v"].clone()));
        }
    }
    assert_eq!(times.len(), 3);
    approx(times[0].0, 500.0, 20.0);
    approx(times[1].0, 1000.0, 20.0);
    approx(times[2].0, 1500.0, 20.0);
    assert_eq!(
        times.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
        vec![json!(1), json!(2), json!(3)]
    );
}

#[test]
fn zero_velocity_stops_without_notification() {
    let mut e = engine();
    e.receive(json!([{"id": "n", "v": 1}]));
    e.receive(json!({"_": "n", "+v": 1}));
    e.tick(500.0);
    e.receive(json!({"_": "n", "+v": 0}));
    e.tick(500.0);
    assert!(e.animator().is_empty());
    approx(value_at(&e, json!("n")).as_f64().expect("number"), 1.5, 1e-12);
    assert!(sent(&mut e).is_empty());
}

#[test]
fn completion_with_request_list() {
    let mut e = engine();
    e.receive(json!([{"id": "n", "v": 0, "max": 1, "+v~": {"R": ["v", "i"]}}]));
    e.receive(json!({"_": "n", "+v": 4}));
    e.tick(300.0);
    assert_eq!(sent(&mut e), vec![json!({"_": "n", "v": 1, "i": 0})]);
}

#[test]
fn reaction_failure_reports_and_continues() {
    let mut e = engine();
    e.register_reaction("txt", "color", |_, v| {
        if v == &json!("plaid") {
            Err("unsupported color".into())
        } else {
            Ok(())
        }
    });
    e.receive(json!([{"id": "t", "v": "x"}]));
    e.receive(json!({"_": "t", "color": "plaid", "w": 3}));
    assert_eq!(prop_at(&e, json!("t"), "w"), Some(json!(3)));
    assert_eq!(
        sent(&mut e),
        vec![json!({"_": "t", "!": "Problem setting color to plaid :: unsupported color"})]
    );
}

#[test]
fn request_and_queue_run_after_properties() {
    let mut e = engine();
    e.receive(json!([{"v": "pad"}, {"id": "n", "v": 2}]));
    e.receive(json!({"_": "n", "w": 9, "R": ["v", "w", "i", "C", "missing"], "Q": [{"v": 3}, {"v": 4}]}));
    assert_eq!(
        sent(&mut e),
        vec![json!({"_": "n", "v": 2, "w": 9, "i": 1, "C": "num", "missing": null})]
    );
    assert_eq!(value_at(&e, json!("n")), json!(4));
}

#[test]
fn removal_sends_request_with_null_value() {
    let mut e = engine();
    e.receive(json!([{"id": "gone", "v": "bye", "w": 1}]));
    let id = find(&e, json!("gone"));
    e.receive(json!({"_": "gone", "v": null, "R": ["v", "w"]}));
    assert!(e.node(id).is_none());
    assert_eq!(sent(&mut e), vec![json!({"_": "gone", "v": null, "w": 1})]);
}

#[test]
fn container_request_snapshots_children() {
    let mut e = engine();
    e.receive(json!([{"id": "box", "v": [{"id": "a", "v": "x", "w": 2}, {"v": [{"v": true}]}]}]));
    e.receive(json!({"_": "box", "R": ["v"]}));
    let out = sent(&mut e);
    assert_eq!(
        out[0]["v"],
        json!([
            {"C": "txt", "id": "a", "w": 2, "v": "x"},
            {"C": "bin", "v": [{"C": "btn", "in": 1, "v": true}]}
        ])
    );
}

#[test]
fn leading_null_clears_container() {
    let mut e = engine();
    e.receive(json!([{"id": "box", "v": [{"v": 1}, {"v": 2}]}]));
    let box_id = find(&e, json!("box"));
    let old = e.node(box_id).expect("live").children().to_vec();
    e.receive(json!({"_": "box", "v": [null, {"v": "fresh"}]}));
    let node = e.node(box_id).expect("live");
    assert_eq!(node.children().len(), 1);
    assert!(old.iter().all(|c| e.node(*c).is_none()));
    assert_eq!(value_at(&e, json!(["box", 0])), json!("fresh"));
}

#[test]
fn index_property_moves_node() {
    let mut e = engine();
    e.receive(json!([{"id": "a"}, {"id": "b"}, {"id": "c"}]));
    e.receive(json!({"_": "c", "i": 0}));
    let root = e.root();
    let ids: Vec<_> = e
        .tree()
        .children(root)
        .iter()
        .map(|c| e.node(*c).and_then(|n| n.id()).unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}

#[test]
fn null_message_resets_document_but_not_clock() {
    let mut e = engine();
    e.receive(json!([{"id": "a", "v": 1}]));
    e.receive(json!({"_": "a", "v": 2, "Td": 10}));
    e.tick(100.0);
    e.receive(JsonValue::Null);
    assert_eq!(e.tree().node_count(), 1);
    assert!(e.scheduler().is_empty());
    approx(e.now_ms(), 100.0, 1e-12);
}

#[test]
fn root_class_and_scalar_value_are_refused() {
    let mut e = engine();
    e.receive(json!({"C": "txt"}));
    e.receive(json!(5));
    let root = e.root();
    assert_eq!(e.node(root).expect("root").class(), "bin");
    let out = sent(&mut e);
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|m| m.get("!").is_some() && m.get("_").is_none()));
}

#[test]
fn array_default_and_scalar_df_are_errors() {
    let mut e = engine();
    e.receive(json!({"df": {"items": [1, 2], "w": 3}, "v": [{"id": "t", "v": "x"}]}));
    assert_eq!(prop_at(&e, json!("t"), "w"), Some(json!(3)));
    assert_eq!(prop_at(&e, json!("t"), "items"), None);
    e.receive(json!({"_": "t", "df": {"w": 1}}));
    let out = sent(&mut e);
    assert_eq!(out.len(), 2);
    assert_eq!(out[1]["_"], json!("t"));
}

#[test]
fn class_inference_prefers_inherited_class() {
    let mut e = engine();
    e.register_class(ClassSpec::new("label", Family::Text));
    e.receive(json!({"df": {"C": "label"}, "v": [{"v": "a"}, {"v": 1}, {"C": "txt", "v": "b"}, {"C": "txt", "v": 2}]}));
    let root = e.root();
    let classes: Vec<String> = e
        .tree()
        .children(root)
        .iter()
        .map(|c| e.node(*c).expect("live").class().to_string())
        .collect();
    assert_eq!(classes, vec!["label", "num", "txt", "num"]);
}

#[test]
fn default_value_fills_only_matching_family() {
    let mut e = engine();
    e.receive(json!({"df": {"v": "placeholder"}, "v": [{"C": "txt"}, {"C": "num"}, {}]}));
    assert_eq!(value_at(&e, json!(0)), json!("placeholder"));
    assert_eq!(value_at(&e, json!(1)), json!(0));
    assert_eq!(value_at(&e, json!(2)), json!("placeholder"));
}

#[test]
fn delayed_child_adds_itself_later() {
    let mut e = engine();
    e.receive(json!([{"v": "now"}, {"v": "soon", "Td": 1}]));
    let root = e.root();
    assert_eq!(e.tree().children(root).len(), 1);
    e.tick(1000.0);
    assert_eq!(e.tree().children(root).len(), 2);
    assert_eq!(value_at(&e, json!(1)), json!("soon"));
}

#[test]
fn triggers_repeat_unless_configured_once() {
    for (mode, expected) in [(TriggerMode::Repeat, 2), (TriggerMode::Once, 1)] {
        let cfg = Config {
            trigger_mode: mode,
            ..Config::default()
        };
        let mut e = Engine::new(cfg, Outbox::new());
        e.receive(json!([{"id": "b", "C": "btn"}, {"id": "count", "v": 0}]));
        let count = find(&e, json!("count"));
        let hits = Rc::new(RefCell::new(0));
        let h = hits.clone();
        e.register_reaction("num", "hit", move |_, _| {
            *h.borrow_mut() += 1;
            Ok(())
        });
        e.receive(json!({"_": "count", "Tr": {"_": "b"}, "hit": 1}));
        let b = find(&e, json!("b"));
        e.user_event(b, "v", json!(true));
        e.user_event(b, "v", json!(false));
        assert_eq!(*hits.borrow(), expected, "{mode:?}");
        assert!(e.node(count).is_some());
    }
}

#[test]
fn runaway_triggers_hit_the_step_limit() {
    let cfg = Config {
        trigger_step_limit: 5,
        ..Config::default()
    };
    let mut e = Engine::new(cfg, Outbox::new());
    e.receive(json!([{"id": "echo", "v": 0}]));
    e.receive(json!({"_": "echo", "Tr": {}, "R": ["v"]}));
    let echo = find(&e, json!("echo"));
    e.user_event(echo, "v", json!(1));
    // the event itself plus one response per permitted firing
    assert_eq!(e.transport().len(), 6);
}

#[test]
fn user_event_capture_filters() {
    let mut e = engine();
    e.receive(json!([{"id": "k", "v": "", "on": {"key": ["Enter"], "focus": true, "blur": false}}]));
    let k = find(&e, json!("k"));
    e.user_event(k, "key", json!("a"));
    e.user_event(k, "key", json!("Enter"));
    e.user_event(k, "focus", json!(1));
    e.user_event(k, "blur", json!(1));
    e.user_event(k, "v", json!("typed"));
    assert_eq!(
        sent(&mut e),
        vec![
            json!({"_": "k", "key": "Enter"}),
            json!({"_": "k", "focus": 1}),
            json!({"_": "k", "v": "typed"}),
        ]
    );
    assert_eq!(value_at(&e, json!("k")), json!("typed"));
}

#[test]
fn outbound_messages_carry_timestamp() {
    let mut e = engine();
    e.receive(json!([{"id": "b", "C": "btn"}]));
    e.tick(1234.0);
    let b = find(&e, json!("b"));
    e.user_event(b, "v", json!(true));
    assert_eq!(e.transport().last().expect("sent")["u"], json!(1234));
}

#[test]
fn require_reports_table_or_errors() {
    let mut e = engine();
    e.receive(json!({"require": {}}));
    let out = sent(&mut e);
    assert_eq!(out[0]["require"]["C"], json!(["bin", "txt", "num", "btn"]));

    e.receive(json!({"require": {"C": ["txt"], "Td": 1}, "v": [{"id": "app", "v": "hi"}]}));
    assert!(sent(&mut e).is_empty());
    assert!(e.find(&json!("app")).is_some());

    e.receive(json!({"require": {"C": ["grid"], "telepathy": true}, "w": 5}));
    let out = sent(&mut e);
    assert_eq!(
        out,
        vec![
            json!({"!": "Sorry, I cannot handle required option-value: {C:\"grid\"}"}),
            json!({"!": "Sorry, I cannot handle required option: telepathy"}),
        ]
    );
    assert!(e.transport().is_closed());
    assert!(e.find(&json!("app")).is_none());
    let error = find(&e, json!("Error"));
    assert_eq!(e.node(error).expect("live").children().len(), 2);
    let root = e.root();
    assert!(e.node(root).expect("root").property("w").is_none());
}

#[test]
fn search_by_nested_address_skips_anonymous_containers() {
    let mut e = engine();
    e.receive(json!([{"v": [{"id": "panel", "v": [{"v": "a"}, {"v": "b"}]}]}]));
    e.receive(json!({"_": ["panel", -1], "v": "last"}));
    assert_eq!(value_at(&e, json!([0, "panel", 1])), json!("last"));
    let root = e.root();
    let panel = find(&e, json!("panel"));
    let steps = address::Address::from_json(&json!(["panel", 0])).expect("parse");
    assert_eq!(
        address::resolve(e.tree(), root, steps.steps()),
        e.node(panel).map(|n| n.children()[0])
    );
}

#[test]
fn renamed_ids_keep_addresses_consistent() {
    let mut e = engine();
    e.receive(json!([{"id": "old", "v": "x"}]));
    e.receive(json!({"_": "old", "id": "new"}));
    assert!(e.find(&json!("old")).is_none());
    let n = find(&e, json!("new"));
    assert_eq!(e.address_of(n).expect("address").to_json(), json!("new"));
}
