use super::*;
use serde_json::json;

#[test]
fn test_parse_fetch() {
    let message = WireMessage::parse("clientA-00abc").unwrap();
    assert_eq!(
        message,
        WireMessage::Fetch {
            client_id: "clientA".to_string(),
            id: "00abc".to_string(),
        }
    );
}

#[test]
fn test_parse_fetch_splits_on_first_dash_only() {
    let message = WireMessage::parse("clientA-00abc-extra").unwrap();
    assert_eq!(
        message,
        WireMessage::Fetch {
            client_id: "clientA".to_string(),
            id: "00abc-extra".to_string(),
        }
    );
}

#[test]
fn test_parse_strips_line_ending() {
    let message = WireMessage::parse("clientA-00abc\r\n").unwrap();
    assert_eq!(message.encode(), "clientA-00abc");
}

#[test]
fn test_parse_delete() {
    let message = WireMessage::parse("delete-00abc-task").unwrap();
    assert_eq!(
        message,
        WireMessage::Delete {
            id: "00abc".to_string(),
            kind: RecordKind::Task,
        }
    );
}

#[test]
fn test_parse_delete_accepts_payload_tags() {
    let message = WireMessage::parse("delete-00abc-sandScript").unwrap();
    assert_eq!(
        message,
        WireMessage::Delete {
            id: "00abc".to_string(),
            kind: RecordKind::Script,
        }
    );
}

#[test]
fn test_parse_delete_is_checked_before_fetch() {
    // Without the literal check this would be a fetch for client "delete".
    let err = WireMessage::parse("delete-00abc").unwrap_err();
    assert_eq!(err, ProtocolError::MissingKindTag("delete-00abc".to_string()));
}

#[test]
fn test_parse_delete_unknown_tag() {
    let err = WireMessage::parse("delete-00abc-widget").unwrap_err();
    assert_eq!(err, ProtocolError::UnknownKindTag("widget".to_string()));
}

#[test]
fn test_parse_empty_client_id() {
    let err = WireMessage::parse("-00abc").unwrap_err();
    assert_eq!(err, ProtocolError::EmptyClientId("-00abc".to_string()));
}

#[test]
fn test_parse_missing_separator() {
    let err = WireMessage::parse("nodashhere").unwrap_err();
    assert!(matches!(err, ProtocolError::MissingSeparator(_)));
}

#[test]
fn test_parse_empty_identifier() {
    assert!(matches!(
        WireMessage::parse("clientA-").unwrap_err(),
        ProtocolError::EmptyIdentifier(_)
    ));
    assert!(matches!(
        WireMessage::parse("delete--task").unwrap_err(),
        ProtocolError::EmptyIdentifier(_)
    ));
}

#[test]
fn test_parse_rejects_path_like_client_ids() {
    assert!(matches!(
        WireMessage::parse("../etc-00abc").unwrap_err(),
        ProtocolError::InvalidClientId(_)
    ));
    assert!(matches!(
        WireMessage::parse("..-00abc").unwrap_err(),
        ProtocolError::InvalidClientId(_)
    ));
    assert!(WireMessage::parse("worker_1.a-00abc").is_ok());
}

#[test]
fn test_parse_rejects_non_ascii() {
    assert_eq!(
        WireMessage::parse("clïent-00abc").unwrap_err(),
        ProtocolError::NotAscii
    );
}

#[test]
fn test_encode_delete() {
    let message = WireMessage::Delete {
        id: "00abc".to_string(),
        kind: RecordKind::Script,
    };
    assert_eq!(message.encode(), "delete-00abc-script");
}

#[test]
fn test_script_descriptor_from_camel_case() {
    let descriptor: ScriptDescriptor = serde_json::from_value(json!({
        "globals": {"limit": 3},
        "api": ["now"],
        "source": "exports.run = () => exit(limit);",
        "methodName": "run"
    }))
    .unwrap();

    assert_eq!(descriptor.globals.get("limit"), Some(&json!(3)));
    assert_eq!(descriptor.api, vec!["now".to_string()]);
    assert_eq!(descriptor.method_name, "run");
}

#[test]
fn test_script_descriptor_globals_as_encoded_string() {
    let descriptor: ScriptDescriptor = serde_json::from_value(json!({
        "globals": "{\"name\":\"sand\"}",
        "source": "",
        "methodName": "main"
    }))
    .unwrap();

    assert_eq!(descriptor.globals.get("name"), Some(&json!("sand")));
    assert!(descriptor.api.is_empty());
}

#[test]
fn test_script_descriptor_rejects_non_object_globals() {
    let result = serde_json::from_value::<ScriptDescriptor>(json!({
        "globals": [1, 2],
        "source": "",
        "methodName": "main"
    }));
    assert!(result.is_err());
}

#[test]
fn test_task_request_defaults_options() {
    let request: TaskRequest = serde_json::from_value(json!({"task": "build"})).unwrap();
    assert_eq!(request.options, json!({}));
}

#[test]
fn test_handler_name() {
    let answer = TaskAnswer {
        task: "build".to_string(),
        data: json!(null),
    };
    assert_eq!(answer.handler_name(), "onBuildTask");

    let answer = TaskAnswer {
        task: "fetchRows".to_string(),
        data: json!(null),
    };
    assert_eq!(answer.handler_name(), "onFetchRowsTask");
}

#[test]
fn test_error_report_redaction_drops_frames() {
    let report = ErrorReport::new(
        "boom",
        "TypeError: boom\n    at run (script:1:10)\n    at <main>",
    );

    let redacted = report.clone().apply(StackPolicy::Redact);
    assert_eq!(redacted.message, "boom");
    assert_eq!(redacted.stack, "TypeError: boom");

    assert_eq!(report.clone().apply(StackPolicy::Preserve), report);
}

#[test]
fn test_error_record_shape() {
    let record = ErrorRecord::from(ErrorReport::from_message("bad"));
    assert_eq!(
        serde_json::to_value(&record).unwrap(),
        json!({"error": {"message": "bad", "stack": "Error: bad"}})
    );
}

#[test]
fn test_sandcell_error_report_passthrough() {
    let report = ErrorReport::new("thrown", "Error: thrown\n    at x");
    let err = SandcellError::Script(report.clone());
    assert_eq!(err.report(), report);

    let err = SandcellError::Connection("gone".to_string());
    assert_eq!(err.report().message, "Connection error: gone");
}
