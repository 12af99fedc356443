//! Test plan schema validation against a realistic input file.

use rf_bench::config::{FrequencySpec, PowerSpec, TestPlan};
use std::io::Write;

const PLAN: &str = r#"{
  "nr5g": [
    {
      "run": false,
      "center_frequency_ghz": [6.123, 6.223, 6.323, 6.423],
      "power_dbm": [-20, -16, -12, -8, -4, 0, 4, 8, 10],
      "measure_aclr": true,
      "waveform_file": "/var/user/5GNR/5GNR_UL_10MHz_256QAM_30kHz_24RB_0RBO.wv",
      "setup_file": "C:/r_s/instr/user/5GNR_UL_10MHz_256QAM_30kHz_24RB_0RBO.dfl"
    }
  ],
  "lte": [
    {
      "run": true,
      "center_frequency_ghz": 6.201,
      "power_dbm": -10.0
    }
  ],
  "spur_search": [
    {
      "run": true,
      "fundamental_frequency_ghz": [2.43, 2.44],
      "rbw_mhz": 0.02,
      "spur_limit_dbm": -122,
      "power_dbm": -70
    }
  ],
  "STN": [
    {
      "run": true,
      "center_frequency_ghz": { "range": { "start_ghz": 2.4, "stop_ghz": 2.481, "step_mhz": 5 } },
      "iterations": 5
    }
  ]
}"#;

fn load_plan(raw: &str) -> TestPlan {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(raw.as_bytes()).unwrap();
    file.flush().unwrap();
    TestPlan::load(file.path()).unwrap()
}

#[test]
fn full_plan_round_trips() {
    let plan = load_plan(PLAN);

    assert_eq!(plan.nr5g.len(), 1);
    assert_eq!(plan.lte.len(), 1);
    assert_eq!(plan.spur_search.len(), 1);
    assert_eq!(plan.stn.len(), 1);

    let nr5g = &plan.nr5g[0];
    assert!(!nr5g.run);
    assert_eq!(nr5g.center_frequency_ghz.expand().unwrap().len(), 4);
    assert_eq!(nr5g.power_dbm.levels().len(), 9);
    assert!(nr5g
        .waveform_file
        .as_deref()
        .unwrap()
        .ends_with("5GNR_UL_10MHz_256QAM_30kHz_24RB_0RBO.wv"));
}

#[test]
fn scalar_fields_and_defaults() {
    let plan = load_plan(PLAN);
    let lte = &plan.lte[0];

    assert!(lte.run);
    assert_eq!(lte.center_frequency_ghz, FrequencySpec::Scalar(6.201));
    assert_eq!(lte.power_dbm, PowerSpec::Scalar(-10.0));
    // Unstated fields take their defaults
    assert!(lte.measure_aclr);
    assert!(lte.waveform_file.is_none());
    assert!(lte.setup_file.is_none());
}

#[test]
fn stn_range_expands_to_inclusive_linspace() {
    let plan = load_plan(PLAN);
    let freqs = plan.stn[0].center_frequency_ghz.expand().unwrap();

    // (2.481 - 2.4) / 0.005 = 16.2, truncated to 16 steps, 17 points
    assert_eq!(freqs.len(), 17);
    assert!((freqs[0] - 2.4).abs() < 1e-12);
    assert!((freqs[16] - 2.481).abs() < 1e-12);
    assert_eq!(plan.stn[0].iterations, 5);
}

#[test]
fn frequencies_survive_serialization_at_full_precision() {
    let plan = load_plan(PLAN);
    let json = serde_json::to_string(&plan).unwrap();
    let back: TestPlan = serde_json::from_str(&json).unwrap();
    assert_eq!(
        back.nr5g[0].center_frequency_ghz,
        plan.nr5g[0].center_frequency_ghz
    );
    assert_eq!(
        back.stn[0].center_frequency_ghz,
        plan.stn[0].center_frequency_ghz
    );
}

#[test]
fn missing_sections_default_to_empty() {
    let plan = load_plan(r#"{ "lte": [] }"#);
    assert!(plan.nr5g.is_empty());
    assert!(plan.lte.is_empty());
    assert!(plan.spur_search.is_empty());
    assert!(plan.stn.is_empty());
}

#[test]
fn malformed_plan_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{ not json").unwrap();
    file.flush().unwrap();
    assert!(TestPlan::load(file.path()).is_err());
}
