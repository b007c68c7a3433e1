use std::{collections::HashMap, fs::File};

use serde::Deserialize;

use featurevisor::{ClientConfig, Context, DatafileContent};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Assertion {
    description: String,
    feature: String,
    #[serde(default)]
    context: Context,
    expected_to_be_enabled: Option<bool>,
    expected_variation: Option<String>,
    #[serde(default)]
    expected_variables: HashMap<String, serde_json::Value>,
}

fn load_datafile() -> DatafileContent {
    let f = File::open("tests/data/datafile.json").unwrap();
    serde_json::from_reader(f).unwrap()
}

#[test]
fn datafile_assertions() {
    let _ = env_logger::builder().is_test(true).try_init();

    let client = ClientConfig::from_datafile(load_datafile())
        .to_client()
        .unwrap();

    let f = File::open("tests/data/assertions.json").unwrap();
    let assertions: Vec<Assertion> = serde_json::from_reader(f).unwrap();

    for assertion in assertions {
        print!("{}: {} ... ", assertion.feature, assertion.description);

        if let Some(expected) = assertion.expected_to_be_enabled {
            assert_eq!(
                client.is_enabled(&assertion.feature, &assertion.context),
                expected,
                "{}",
                assertion.description
            );
        }

        if let Some(expected) = &assertion.expected_variation {
            assert_eq!(
                client
                    .get_variation(&assertion.feature, &assertion.context)
                    .as_ref(),
                Some(expected),
                "{}",
                assertion.description
            );
        }

        for (variable_key, expected) in &assertion.expected_variables {
            let actual = client.get_variable(&assertion.feature, variable_key, &assertion.context);
            assert_eq!(
                serde_json::to_value(actual).unwrap(),
                *expected,
                "{}: variable {variable_key}",
                assertion.description
            );
        }

        println!("ok");
    }
}

#[test]
fn typed_variable_accessors() {
    let client = ClientConfig::from_datafile(load_datafile())
        .to_client()
        .unwrap();

    let treatment: Context = [
        ("userId".to_owned(), "user-3".into()),
        ("country".to_owned(), "pl".into()),
    ]
    .into_iter()
    .collect();

    assert_eq!(
        client.get_variable_string("checkout-flow", "color", &treatment),
        Some("red".to_owned())
    );
    assert_eq!(
        client.get_variable_boolean("checkout-flow", "showPromo", &treatment),
        Some(true)
    );
    assert_eq!(
        client.get_variable_integer("checkout-flow", "maxItems", &treatment),
        Some(10)
    );
    assert_eq!(
        client.get_variable_double("checkout-flow", "discount", &treatment),
        Some(12.5)
    );
    assert_eq!(
        client.get_variable_array("checkout-flow", "paymentMethods", &treatment),
        Some(vec!["card".to_owned(), "ideal".to_owned()])
    );
    assert_eq!(
        client
            .get_variable_object("checkout-flow", "theme", &treatment)
            .and_then(|theme| theme.get("mode").cloned()),
        Some(serde_json::json!("dark"))
    );
    assert_eq!(
        client.get_variable_json("checkout-flow", "retryPolicy", &treatment),
        Some(serde_json::json!({"retries": 1}))
    );

    // Wrong accessor for the declared type.
    assert_eq!(
        client.get_variable_boolean("checkout-flow", "color", &treatment),
        None
    );
    assert_eq!(
        client.get_variable_string("checkout-flow", "unknown", &treatment),
        None
    );
}
