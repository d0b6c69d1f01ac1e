//! End-to-end tests: schema documents through parser, catalog, runtime,
//! command facade and version resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ac_bindings::{
    build_catalog, connect_with, load_documents, parse_documents, Args, Bindings, Catalog,
    ClassType, CommandError, CommandFacade, ConstructionError, Document, Error, FieldValue,
    ProbeOptions,
    ReleaseLayout, Reply, TransportError, Utilities, Version, VersionError,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/schemas")
}

fn catalog() -> Catalog {
    let documents = load_documents(&fixtures()).unwrap();
    build_catalog(&parse_documents(&documents).unwrap()).unwrap()
}

fn bindings() -> Arc<Bindings> {
    Arc::new(Bindings::from_catalog(catalog()).unwrap())
}

fn replying(response: Value) -> impl Fn(&str) -> Result<Value, TransportError> {
    move |_body: &str| Ok(response.clone())
}

// === Scenario 1: primitive definitions ===

#[test]
fn primitive_definition_emits_no_class() {
    let catalog = catalog();
    assert!(catalog.class("message").is_none());

    let note = catalog.class("Note").unwrap();
    let text = note.attribute("text").unwrap();
    assert_eq!(text.type_name, "str");
    assert_eq!(text.constraints.min_length, Some(2));
    assert_eq!(text.constraints.max_length, Some(3));
}

#[test]
fn primitive_facets_apply_to_fields() {
    let bindings = bindings();
    let mut note = bindings.from_dict("Note", &json!({"text": "a."})).unwrap();

    let err = note.set("text", "a").unwrap_err();
    assert!(
        matches!(err, ConstructionError::Rejected { ref rule, .. } if rule.starts_with("minLength"))
    );

    let err = note.set("text", "ab").unwrap_err();
    assert!(
        matches!(err, ConstructionError::Rejected { ref rule, .. } if rule.starts_with("matches"))
    );

    note.set("text", "ab.").unwrap();
    assert_eq!(note.to_dict(), json!({"text": "ab."}));
}

// === Scenario 2: UUID object ===

#[test]
fn uuid_object_round_trip() {
    let bindings = bindings();
    let dict = json!({"guid": "260D42E3-AA2E-4DAD-BFFA-F2B5021501CC"});
    let id = bindings.from_dict("ElementId", &dict).unwrap();
    assert_eq!(id.to_dict(), dict);

    let err = bindings
        .from_dict("ElementId", &json!({"guid": "260D42E3-AA2E-4DAD-BFFA"}))
        .unwrap_err();
    assert!(matches!(err, ConstructionError::Rejected { .. }));
}

// === Scenario 3: nested construction ===

#[test]
fn nested_self_referencing_class() {
    let bindings = bindings();
    let dict = json!({
        "name": "L1",
        "type": "LayoutBook",
        "example": {
            "name": "L2",
            "type": "LayoutBook",
            "example": {"name": "L3", "type": "ProjectMap"}
        }
    });
    let mut a = bindings.from_dict("A", &dict).unwrap();
    assert_eq!(
        a.path(&["example", "example", "name"])
            .and_then(FieldValue::as_str),
        Some("L3")
    );

    let err = a.set("type", "Invalid").unwrap_err();
    assert!(
        matches!(err, ConstructionError::Rejected { ref rule, .. } if rule.starts_with("valueSet"))
    );
}

#[test]
fn positional_and_named_construction_agree() {
    let bindings = bindings();
    let positional = bindings
        .construct("A", Args::new().arg("ViewMap").arg("Plans"))
        .unwrap();
    let named = bindings
        .construct("A", Args::new().named("name", "Plans").named("type", "ViewMap"))
        .unwrap();
    assert_eq!(positional, named);
    assert_eq!(positional.to_dict(), json!({"type": "ViewMap", "name": "Plans"}));
}

// === Scenario 4: union dispatch ===

#[test]
fn union_dispatch() {
    let catalog = catalog();
    let union = catalog.class("PropertyUserId").unwrap();
    assert_eq!(union.class_type, ClassType::Oneof);
    assert_eq!(
        union.of_type_class_names,
        ["UserDefinedPropertyUserId", "BuiltInPropertyUserId"]
    );
    // "type" is required in both variants, the others in one only.
    assert!(union.attribute("type").unwrap().required);
    assert!(!union.attribute("localizedName").unwrap().required);
    assert!(catalog.warnings.is_empty());

    let bindings = bindings();
    let builtin = bindings
        .construct(
            "PropertyUserId",
            Args::new().named("type", "BuiltIn").named("nonLocalizedName", "X"),
        )
        .unwrap();
    assert_eq!(builtin.class_name(), "BuiltInPropertyUserId");

    let user = bindings
        .construct(
            "PropertyUserId",
            Args::new()
                .named("type", "UserDefined")
                .named("localizedName", json!(["G", "P"])),
        )
        .unwrap();
    assert_eq!(user.class_name(), "UserDefinedPropertyUserId");

    let err = bindings
        .construct(
            "PropertyUserId",
            Args::new()
                .named("type", "UserDefined")
                .named("localizedName", json!(["G", "P"]))
                .named("nonLocalizedName", "X"),
        )
        .unwrap_err();
    assert!(matches!(err, ConstructionError::NoVariant { .. }));
}

// === Scenario 5: command round-trip ===

#[test]
fn command_round_trip() {
    let facade = CommandFacade::new(
        replying(json!({
            "succeeded": true,
            "result": {"version": 24, "buildNumber": 2310, "languageCode": "INT"},
            "executionDuration": 0.5
        })),
        bindings(),
    );
    assert_eq!(
        facade.request("GetProductInfo", Args::new()).unwrap(),
        r#"{"command":"API.GetProductInfo"}"#
    );
    let reply = facade.call("GetProductInfo", Args::new()).unwrap();
    assert_eq!(
        reply,
        Reply::Tuple(vec![
            FieldValue::Int(24),
            FieldValue::Int(2310),
            FieldValue::Str("INT".into())
        ])
    );
}

#[test]
fn command_failure_carries_response() {
    let response = json!({"succeeded": false, "error": {"code": 7, "message": "Not available."}});
    let facade = CommandFacade::new(replying(response.clone()), bindings());
    let err = facade.call("GetProductInfo", Args::new()).unwrap_err();
    assert!(matches!(err, CommandError::Unsucceeded { .. }));
    assert_eq!(err.response(), Some(&response));
}

#[test]
fn union_typed_parameters_are_serialized() {
    let bindings = bindings();
    let sent = std::cell::RefCell::new(String::new());
    let transport = |body: &str| -> Result<Value, TransportError> {
        *sent.borrow_mut() = body.to_string();
        Ok(json!({"succeeded": true, "result": {"properties": [
            {"propertyId": {"guid": "7E9A3A4C-1C6D-4C71-9F0F-9B0E0A6D5C11"}}
        ]}}))
    };
    let facade = CommandFacade::new(transport, Arc::clone(&bindings));
    let utilities = Utilities::new(&facade);
    let user_id = utilities.builtin_property_user_id("General_ElementID").unwrap();

    let reply = facade
        .call(
            "GetPropertyIds",
            Args::new().named("properties", json!([{"propertyUserId": user_id.to_dict()}])),
        )
        .unwrap();

    let sent: Value = serde_json::from_str(&sent.borrow()).unwrap();
    assert_eq!(
        sent,
        json!({"command": "API.GetPropertyIds", "parameters": {"properties": [
            {"propertyUserId": {"type": "BuiltIn", "nonLocalizedName": "General_ElementID"}}
        ]}})
    );

    let Reply::Value(FieldValue::List(items)) = reply else {
        panic!("expected a list");
    };
    let item = items[0].as_instance().unwrap();
    assert_eq!(
        item.path(&["propertyId", "guid"]).and_then(FieldValue::as_str),
        Some("7E9A3A4C-1C6D-4C71-9F0F-9B0E0A6D5C11")
    );
}

#[test]
fn utilities_over_facade() {
    let transport = |body: &str| -> Result<Value, TransportError> {
        let request: Value = serde_json::from_str(body).unwrap();
        Ok(match request["command"].as_str() {
            Some("API.IsAlive") => json!({"succeeded": true, "result": {"isAlive": true}}),
            _ => json!({"succeeded": true, "result": {
                "version": 27, "buildNumber": 3001, "languageCode": "GER"
            }}),
        })
    };
    let facade = CommandFacade::new(transport, bindings());
    let utilities = Utilities::new(&facade);
    assert!(utilities.is_alive().unwrap());
    let info = utilities.product_info().unwrap();
    assert_eq!((info.version, info.build_number), (27, 3001));
    assert_eq!(info.language_code, "GER");

    let user = utilities
        .user_defined_property_user_id("Group", "Name")
        .unwrap();
    assert_eq!(
        user.to_dict(),
        json!({"type": "UserDefined", "localizedName": ["Group", "Name"]})
    );
}

#[test]
fn every_class_round_trips_through_binding_files() {
    let dir = TempDir::new().unwrap();
    let layout = ReleaseLayout::new(dir.path());
    let version = Version::new(27, 3001);
    let catalog = catalog();
    layout.write(version, &catalog).unwrap();

    let set = layout.load(version).unwrap();
    assert_eq!(set.bindings.catalog().classes, catalog.classes);
    assert_eq!(set.bindings.catalog().commands, catalog.commands);
    let dict = json!({"x": 1.5, "y": -2.0});
    let point = set.bindings.from_dict("Point2D", &dict).unwrap();
    assert_eq!(point.to_dict(), dict);
}

/// A small catalog whose `Note` is looser than the fixture one and whose
/// `Marker` class and `Ping` command exist nowhere else.
fn marker_catalog() -> Catalog {
    let documents = vec![
        Document::new(
            "Types",
            json!({"definitions": {
                "Note": {
                    "type": "object",
                    "properties": {"text": {"type": "string", "maxLength": 10}},
                    "required": ["text"]
                },
                "Marker": {
                    "type": "object",
                    "properties": {"label": {"type": "string"}},
                    "required": ["label"]
                }
            }}),
        ),
        Document::new(
            "Ping",
            json!({"definitions": {
                "command_parameters": {
                    "type": "object",
                    "properties": {"marker": {"$ref": "#/definitions/Marker"}},
                    "required": ["marker"]
                },
                "response_parameters": {"type": "object", "properties": {}}
            }}),
        ),
    ];
    build_catalog(&parse_documents(&documents).unwrap()).unwrap()
}

#[test]
fn binding_sets_coexist_under_their_own_namespaces() {
    let dir = TempDir::new().unwrap();
    let layout = ReleaseLayout::new(dir.path());
    layout.write(Version::new(26, 1610), &catalog()).unwrap();
    layout
        .write_with_namespace(Version::new(27, 2305), &marker_catalog(), "Legacy")
        .unwrap();
    layout
        .write_with_namespace(Version::new(28, 3001), &catalog(), "Next")
        .unwrap();

    let full = layout.load(Version::new(26, 1700)).unwrap();
    let marker = layout.load(Version::new(27, 2400)).unwrap();
    let next = layout.load(Version::new(28, 3001)).unwrap();
    assert_eq!(marker.manifest.command_namespace, "Legacy");

    let ok = || json!({"succeeded": true, "result": {}});
    let full_facade = CommandFacade::new(replying(ok()), Arc::clone(&full.bindings));
    let marker_facade = CommandFacade::new(replying(ok()), Arc::clone(&marker.bindings));
    let next_facade = CommandFacade::new(replying(ok()), Arc::clone(&next.bindings));

    // Each facade sends its own namespace.
    assert_eq!(
        full_facade.request("IsAlive", Args::new()).unwrap(),
        r#"{"command":"API.IsAlive"}"#
    );
    assert_eq!(
        next_facade.request("IsAlive", Args::new()).unwrap(),
        r#"{"command":"Next.IsAlive"}"#
    );
    assert_eq!(
        marker_facade
            .request("Ping", Args::new().named("marker", json!({"label": "m"})))
            .unwrap(),
        r#"{"command":"Legacy.Ping","parameters":{"marker":{"label":"m"}}}"#
    );

    // Classes and commands of one set are unknown to the others.
    assert!(matches!(
        full_facade.bindings().construct("Marker", Args::new().arg("m")),
        Err(ConstructionError::UnknownClass { .. })
    ));
    assert!(matches!(
        marker_facade
            .bindings()
            .from_dict("ElementId", &json!({"guid": "260D42E3-AA2E-4DAD-BFFA-F2B5021501CC"})),
        Err(ConstructionError::UnknownClass { .. })
    ));
    assert!(matches!(
        full_facade.request("Ping", Args::new()),
        Err(CommandError::UnknownCommand { .. })
    ));
    assert!(matches!(
        marker_facade.call("GetProductInfo", Args::new()),
        Err(CommandError::UnknownCommand { .. })
    ));

    // A same-named class keeps the rules of the set that built it.
    let mut strict = full.bindings.from_dict("Note", &json!({"text": "ab."})).unwrap();
    let mut loose = marker.bindings.from_dict("Note", &json!({"text": "ab."})).unwrap();
    assert!(strict.set("text", "abcdef").is_err());
    loose.set("text", "abcdef").unwrap();
    assert_eq!(loose.to_dict(), json!({"text": "abcdef"}));
    assert_eq!(strict.to_dict(), json!({"text": "ab."}));

    // An instance from one set is not accepted by another set's fields,
    // even when both sets declare the class.
    let dict = json!({"name": "L1", "type": "LayoutBook"});
    let mut own = full.bindings.from_dict("A", &dict).unwrap();
    let foreign = next.bindings.from_dict("A", &dict).unwrap();
    assert!(matches!(
        own.set_instance("example", foreign),
        Err(ConstructionError::WrongKind { .. })
    ));
    let marker_instance = marker
        .bindings
        .from_dict("Marker", &json!({"label": "m"}))
        .unwrap();
    assert!(own.set_instance("example", marker_instance).is_err());
    let child = full.bindings.from_dict("A", &dict).unwrap();
    own.set_instance("example", child).unwrap();
}

// === Scenario 6: version resolution ===

fn release_layout() -> (TempDir, ReleaseLayout) {
    let dir = TempDir::new().unwrap();
    let layout = ReleaseLayout::new(dir.path());
    let catalog = Catalog::default();
    for release in [24, 25, 26, 27, 30] {
        for build in [1610, 2300, 2305, 2310] {
            layout
                .write(Version::new(release, build), &catalog)
                .unwrap();
        }
    }
    (dir, layout)
}

#[test]
fn resolver_never_rounds_up() {
    let (_dir, layout) = release_layout();
    let cases = [
        ((27, 2306), (27, 2305)),
        ((28, 1610), (27, 2310)),
        ((53, 7000), (30, 2310)),
        ((24, 1610), (24, 1610)),
    ];
    for ((release, build), (expected_release, expected_build)) in cases {
        let chosen = layout.resolve(Version::new(release, build)).unwrap();
        assert_eq!(chosen, Version::new(expected_release, expected_build));
    }

    let err = layout.resolve(Version::new(23, 2300)).unwrap_err();
    assert!(matches!(err, VersionError::InvalidTarget { .. }));

    let err = layout.resolve(Version::new(26, 1000)).unwrap_err();
    assert!(matches!(err, VersionError::NoBuild { .. }));
}

#[test]
fn connect_probes_then_loads_bindings() {
    let dir = TempDir::new().unwrap();
    let layout = ReleaseLayout::new(dir.path());
    layout.write(Version::new(27, 2305), &catalog()).unwrap();

    let options = ProbeOptions::new().with_args(["script", "--port", "19730"]);
    let connection = connect_with(&options, &layout, |url: &str| {
        assert_eq!(url, "http://127.0.0.1:19730");
        Ok(replying(json!({"succeeded": true, "result": {
            "version": 27, "buildNumber": 2306, "languageCode": "INT"
        }})))
    })
    .unwrap();

    assert_eq!(connection.port, 19730);
    assert_eq!(connection.binding_set.version, Version::new(27, 2305));
    let reply = connection.facade.call("GetProductInfo", Args::new()).unwrap();
    assert_eq!(reply.into_values()[1], FieldValue::Int(2306));
}

#[test]
fn connect_without_live_port() {
    let dir = TempDir::new().unwrap();
    let layout = ReleaseLayout::new(dir.path());
    let result = connect_with(&ProbeOptions::new(), &layout, |_: &str| {
        Ok(replying(json!({"succeeded": false})))
    });
    let err = result.err().unwrap();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(err.exit_code(), 3);
}
