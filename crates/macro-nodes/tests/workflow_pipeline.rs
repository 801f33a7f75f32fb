//! End-to-end tests: templates, manager, connections and the loopback
//! MIDI backend working together.

use std::sync::Arc;
use std::time::Duration;

use device_resolution::{
    DetectedDevice, DeviceAssignment, DeviceConfiguration, DeviceResolver, DeviceType, MidiDevice,
};
use macro_engine::{
    EngineConfig, InstanceStatus, MacroEngineError, MacroTypeRegistry, VecEventSink, WorkflowEventType,
    WorkflowManager,
};
use macro_nodes::{builtin_templates, register_builtins, LoopbackMidiBackend, MidiBackend, MidiMessage};
use persistent_state::{JsonFileBackend, MemoryBackend, StateBackend};
use serde_json::{json, Value};

struct Stack {
    backend: Arc<LoopbackMidiBackend>,
    resolver: Arc<DeviceResolver>,
    manager: WorkflowManager,
}

fn midi_device(id: &str, name: &str) -> MidiDevice {
    MidiDevice {
        id: id.to_string(),
        name: name.to_string(),
        manufacturer: "Loopback".to_string(),
        available: true,
        channels: Vec::new(),
    }
}

fn assignment(id: &str, name: &str, device_type: DeviceType) -> DeviceAssignment {
    DeviceAssignment {
        device_id: id.to_string(),
        device_name: name.to_string(),
        device_type,
    }
}

fn device_config() -> DeviceConfiguration {
    let mut config = DeviceConfiguration::default();
    config.input_devices.push(midi_device("loopback-in-keys", "Keys"));
    config.output_devices.push(midi_device("loopback-out-synth", "Synth"));
    config.logical_devices.insert(
        "main_controller".to_string(),
        assignment("loopback-in-keys", "Keys", DeviceType::Input),
    );
    config.logical_devices.insert(
        "main_synth".to_string(),
        assignment("loopback-out-synth", "Synth", DeviceType::Output),
    );
    config
}

fn stack_with(state: Arc<dyn StateBackend>) -> Stack {
    let backend = Arc::new(LoopbackMidiBackend::new().with_input("Keys").with_output("Synth"));
    let mut registry = MacroTypeRegistry::with_builtins();
    register_builtins(&mut registry, backend.clone());

    let resolver = Arc::new(DeviceResolver::new(device_config()));
    let manager = WorkflowManager::new(Arc::new(registry), state, EngineConfig::default());
    for template in builtin_templates(resolver.clone()) {
        manager.register_template(template);
    }
    Stack {
        backend,
        resolver,
        manager,
    }
}

fn stack() -> Stack {
    stack_with(Arc::new(MemoryBackend::new()))
}

fn mod_to_volume(min: i64, max: i64) -> Value {
    json!({
        "workflowId": "mod-to-volume",
        "inputDevice": "main_controller",
        "inputChannel": "main",
        "inputCC": "mod_wheel",
        "outputDevice": "main_synth",
        "outputChannel": 2,
        "outputCC": "volume",
        "minValue": min,
        "maxValue": max,
    })
}

fn cc(channel: u8, controller: u8, value: u8) -> MidiMessage {
    MidiMessage::ControlChange {
        channel,
        controller,
        value,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn test_cc_chain_maps_controller_to_output() {
    let stack = stack();
    let id = stack
        .manager
        .create_workflow_from_template("midi_cc_chain", &mod_to_volume(50, 100))
        .await
        .unwrap();
    assert_eq!(id, "mod-to-volume");

    stack.backend.inject("Keys", cc(1, 1, 0)).unwrap();
    settle().await;
    stack.backend.inject("Keys", cc(1, 1, 127)).unwrap();
    settle().await;
    // Different controller: filtered out by the input node
    stack.backend.inject("Keys", cc(1, 2, 127)).unwrap();
    settle().await;

    assert_eq!(stack.backend.sent_to("Synth"), vec![cc(2, 7, 50), cc(2, 7, 100)]);

    let instance = stack.manager.get_instance("mod-to-volume").await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.node_ids, vec!["input", "processor", "output"]);
    assert_eq!(instance.metrics.error_count, 0);
    assert!(instance.metrics.event_count >= 2);
}

#[tokio::test]
async fn test_burst_is_throttled_but_never_starved() {
    let stack = stack();
    stack
        .manager
        .create_workflow_from_template(
            "midi_thru",
            &json!({"workflowId": "thru", "inputDevice": "main_controller", "outputDevice": "main_synth"}),
        )
        .await
        .unwrap();

    for value in 0..20 {
        stack.backend.inject("Keys", cc(1, 1, value)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = stack.backend.sent_to("Synth");
    assert!(!sent.is_empty());
    assert!(sent.len() < 20);
    assert_eq!(sent.first(), Some(&cc(1, 1, 0)));
    assert_eq!(sent.last(), Some(&cc(1, 1, 19)));
}

#[tokio::test]
async fn test_hot_update_replaces_listener() {
    let stack = stack();
    stack
        .manager
        .create_workflow_from_template("midi_cc_chain", &mod_to_volume(50, 100))
        .await
        .unwrap();

    let mut next = stack.manager.get_workflow("mod-to-volume").await.unwrap();
    next.macros[1].config["outputRange"] = json!([0, 10]);
    let version = stack.manager.update_workflow("mod-to-volume", next).await.unwrap();
    assert_eq!(version, 2);

    // One live listener on the device, not two
    assert_eq!(stack.backend.input_stream("Keys").unwrap().subscriber_count(), 1);

    stack.backend.inject("Keys", cc(1, 1, 127)).unwrap();
    settle().await;
    assert_eq!(stack.backend.sent_to("Synth"), vec![cc(2, 7, 10)]);
}

#[tokio::test]
async fn test_disable_stops_flow() {
    let stack = stack();
    let sink = Arc::new(VecEventSink::new());
    stack.manager.on(WorkflowEventType::WorkflowDisabled, sink.clone());
    stack
        .manager
        .create_workflow_from_template("midi_cc_chain", &mod_to_volume(0, 127))
        .await
        .unwrap();

    stack.manager.disable_workflow("mod-to-volume").await.unwrap();
    stack.manager.disable_workflow("mod-to-volume").await.unwrap();
    assert_eq!(sink.events().len(), 1);
    assert_eq!(stack.backend.input_stream("Keys").unwrap().subscriber_count(), 0);
    assert!(stack.manager.connection_manager().get_all_connections().is_empty());

    stack.backend.inject("Keys", cc(1, 1, 64)).unwrap();
    settle().await;
    assert!(stack.backend.sent().is_empty());
}

#[tokio::test]
async fn test_reload_recovers_after_device_arrives() {
    let stack = stack();
    let failures = Arc::new(VecEventSink::new());
    stack.manager.on(WorkflowEventType::InstanceFailed, failures.clone());

    let config = json!({
        "workflowId": "late",
        "inputDevice": "main_controller",
        "outputDevice": "Late Synth",
    });
    let err = stack
        .manager
        .create_workflow_from_template("midi_thru", &config)
        .await
        .unwrap_err();
    assert!(matches!(err, MacroEngineError::Instantiation { .. }));
    assert_eq!(failures.events().len(), 1);

    let instance = stack.manager.get_instance("late").await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Error);
    assert!(stack.manager.get_workflow("late").await.is_some());

    stack.backend.connect(DetectedDevice {
        id: "usb-late".to_string(),
        name: "Late Synth".to_string(),
        manufacturer: "Acme".to_string(),
        device_type: DeviceType::Output,
        channels: Vec::new(),
    });
    stack.manager.reload_workflow("late").await.unwrap();
    // The half-built input from the failed attempt was torn down
    assert_eq!(stack.backend.input_stream("Keys").unwrap().subscriber_count(), 1);

    let note = MidiMessage::NoteOn {
        channel: 1,
        note: 60,
        velocity: 80,
    };
    stack.backend.inject("Keys", note).unwrap();
    settle().await;
    assert_eq!(stack.backend.sent_to("Late Synth"), vec![note]);
}

#[tokio::test]
async fn test_unknown_device_is_flagged_by_validation() {
    let stack = stack();
    let template = builtin_templates(stack.resolver.clone())
        .into_iter()
        .find(|t| t.id() == "midi_cc_chain")
        .unwrap();
    let definition = template
        .generate(&json!({"inputDevice": "main_controller", "inputCC": "mod_wheel"}))
        .await
        .unwrap();

    let result = stack.manager.validate_workflow(&definition);
    assert!(result.valid);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.node_id.as_deref() == Some("output")));

    let dry_run = stack.manager.test_workflow(&definition).await;
    assert!(dry_run.success);
    assert_eq!(dry_run.node_results.len(), 2);
}

#[tokio::test]
async fn test_auto_configure_from_loopback_probe() {
    let stack = stack();
    let resolver = DeviceResolver::new(DeviceConfiguration::default());
    let suggestion = resolver.auto_configure_devices(stack.backend.as_ref()).await.unwrap();

    assert_eq!(suggestion.input_devices.len(), 1);
    assert_eq!(suggestion.suggested_assignments["main_controller"].device_name, "Keys");
    assert_eq!(suggestion.suggested_assignments["main_synth"].device_name, "Synth");
    // Advisory only
    assert!(resolver.configuration().logical_devices.is_empty());
}

#[tokio::test]
async fn test_workflows_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let first = stack_with(Arc::new(JsonFileBackend::new(dir.path())));
        first
            .manager
            .create_workflow_from_template("midi_cc_chain", &mod_to_volume(50, 100))
            .await
            .unwrap();
        first.manager.destroy().await;
    }

    let second = stack_with(Arc::new(JsonFileBackend::new(dir.path())));
    assert_eq!(second.manager.initialize().await, 1);
    assert_eq!(second.manager.running_instances().await.len(), 1);

    second.backend.inject("Keys", cc(1, 1, 127)).unwrap();
    settle().await;
    assert_eq!(second.backend.sent_to("Synth"), vec![cc(2, 7, 100)]);
}
