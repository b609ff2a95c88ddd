use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;
use std::process::Command;

use clinpredict::store::open_database;
use tempfile::tempdir;

const SCORING_ROWS: usize = 5;

fn write_extract(path: &Path) {
    let mut csv = String::from("PatientEncounterID,AdmitDTS,LOSNbr,GenderFLG,ThirtyDayReadmitFLG,InTestWindowFLG\n");
    for i in 0..30 + SCORING_ROWS {
        let los = 1 + (i * 5) % 9;
        let gender = if i % 2 == 0 { "F" } else { "M" };
        let scoring = i >= 30;
        let readmit = match (scoring, los > 5) {
            (true, _) => "NULL",
            (false, true) => "Y",
            (false, false) => "N",
        };
        let window = if scoring { "Y" } else { "N" };
        writeln!(csv, "{},2017-03-01 10:00:00,{los},{gender},{readmit},{window}", 500 + i)
            .expect("format row");
    }
    fs::write(path, csv).expect("write extract");
}

#[test]
fn deploy_cli_writes_table_and_tsv() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("encounters.csv");
    let database = tmp.path().join("scores.sqlite");
    let tsv_path = tmp.path().join("out.tsv");
    write_extract(&data_path);

    let exe = env!("CARGO_BIN_EXE_clinpredict");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "deploy",
            data_path.to_str().expect("path str"),
            "--model-type",
            "classification",
            "--method",
            "rf",
            "--grain-column",
            "PatientEncounterID",
            "--window-column",
            "InTestWindowFLG",
            "--predicted-column",
            "ThirtyDayReadmitFLG",
            "--database",
            database.to_str().expect("path str"),
            "--destination-table",
            "HCRDeployClassificationBASE",
            "--create-table",
            "--tsv",
            tsv_path.to_str().expect("path str"),
            "--trees",
            "10",
            "--cores",
            "1",
            "--seed",
            "11",
            "--model-dir",
            "models",
        ])
        .output()
        .expect("run clinpredict cli");

    assert!(
        output.status.success(),
        "CLI exited with status {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("Wrote {SCORING_ROWS} predictions")), "stdout: {stdout}");

    let connection = open_database(&database, false).expect("open database");
    let stored: i64 = connection
        .query_row("SELECT COUNT(*) FROM \"HCRDeployClassificationBASE\"", [], |r| r.get(0))
        .expect("count rows");
    assert_eq!(stored, SCORING_ROWS as i64);

    let tsv = fs::read_to_string(&tsv_path).expect("read tsv");
    let mut lines = tsv.lines();
    assert_eq!(
        lines.next(),
        Some("BindingID\tBindingNM\tLastLoadDTS\tPatientEncounterID\tPredictedProbNBR\tFactor1TXT\tFactor2TXT\tFactor3TXT")
    );
    assert_eq!(lines.count(), SCORING_ROWS);
    assert!(tmp.path().join("models").join("probability.toml").exists());
}

#[test]
fn deploy_cli_fails_without_destination_table() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("encounters.csv");
    let database = tmp.path().join("missing.sqlite");
    write_extract(&data_path);

    let output = Command::new(env!("CARGO_BIN_EXE_clinpredict"))
        .current_dir(tmp.path())
        .args([
            "deploy",
            data_path.to_str().expect("path str"),
            "--model-type",
            "classification",
            "--method",
            "linear",
            "--grain-column",
            "PatientEncounterID",
            "--window-column",
            "InTestWindowFLG",
            "--predicted-column",
            "ThirtyDayReadmitFLG",
            "--database",
            database.to_str().expect("path str"),
            "--destination-table",
            "HCRDeployClassificationBASE",
        ])
        .output()
        .expect("run clinpredict cli");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
    assert!(!database.exists());
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_clinpredict"))
        .arg("version")
        .output()
        .expect("run clinpredict cli");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("clinpredict {}", env!("CARGO_PKG_VERSION")));
}
