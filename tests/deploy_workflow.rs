use clinpredict::frame::load::load_frame;
use clinpredict::learn::{Method, ModelType};
use clinpredict::store::{Destination, create_destination_table, open_database};
use clinpredict::{DeployError, DeploySettings, PrepareSettings, SupervisedDeployment};
use std::fmt::Write as FmtWrite;
use std::path::Path;
use tempfile::tempdir;

const TRAINING_ROWS: usize = 40;
const SCORING_ROWS: usize = 6;

/// A small encounter extract with a timestamp column, null sentinels, a categorical
/// feature, and a mix of training and scoring rows.
fn write_extract(path: &Path) {
    let mut csv = String::from("PatientEncounterID,AdmitDTS,LOSNbr,A1CNbr,GenderFLG,ThirtyDayReadmitFLG,InTestWindowFLG\n");
    for i in 0..TRAINING_ROWS + SCORING_ROWS {
        let los = 1 + (i * 7) % 11;
        let a1c = if i == 4 { "NULL".to_string() } else { format!("{:.1}", 5.0 + (i % 9) as f64 * 0.4) };
        let gender = if i % 3 == 0 { "F" } else { "M" };
        let scoring = i >= TRAINING_ROWS;
        let readmit = if scoring {
            "NULL"
        } else if los > 6 || (i % 5 == 0) {
            "Y"
        } else {
            "N"
        };
        let window = if scoring { "Y" } else { "N" };
        writeln!(
            csv,
            "{},2017-02-{:02} 08:00:00,{los},{a1c},{gender},{readmit},{window}",
            1000 + i,
            1 + i % 28
        )
        .unwrap();
    }
    std::fs::write(path, csv).unwrap();
}

fn prepare(path: &Path, model_type: ModelType, impute: bool) -> SupervisedDeployment {
    let predicted_column = match model_type {
        ModelType::Classification => "ThirtyDayReadmitFLG",
        ModelType::Regression => "A1CNbr",
    };
    let df = load_frame(path).unwrap();
    SupervisedDeployment::prepare(
        df,
        PrepareSettings {
            model_type,
            grain_column: "PatientEncounterID".to_string(),
            window_column: "InTestWindowFLG".to_string(),
            predicted_column: predicted_column.to_string(),
            impute,
        },
    )
    .unwrap()
}

fn deploy_settings(dir: &Path, method: Method, table: &str) -> DeploySettings {
    DeploySettings {
        method,
        cores: 2,
        database: dir.join("deploy.sqlite"),
        destination_table: table.to_string(),
        trees: 20,
        mtry: None,
        use_saved_model: false,
        model_dir: dir.join("models"),
        seed: Some(17),
        verbose: false,
    }
}

fn create_table(settings: &DeploySettings, model_type: ModelType) {
    create_destination_table(&Destination {
        database: settings.database.clone(),
        table: settings.destination_table.clone(),
        grain_column: "PatientEncounterID".to_string(),
        predicted_column: model_type.output_column().to_string(),
    })
    .unwrap();
}

fn stored_grains(settings: &DeploySettings) -> Vec<i64> {
    let connection = open_database(&settings.database, false).unwrap();
    let mut statement = connection
        .prepare(&format!(
            "SELECT \"PatientEncounterID\" FROM {} ORDER BY \"PatientEncounterID\"",
            settings.destination_table
        ))
        .unwrap();
    statement
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<i64>, _>>()
        .unwrap()
}

#[test]
fn classification_forest_scores_every_flagged_row() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("extract.csv");
    write_extract(&data);

    let deployment = prepare(&data, ModelType::Classification, false);
    let partitions = deployment.partitions();
    // The row with a null A1C is a training row and is dropped.
    assert_eq!(partitions.x_train.nrows(), TRAINING_ROWS - 1);
    assert_eq!(partitions.x_test.nrows(), SCORING_ROWS);
    assert!(partitions.x_train.names.iter().all(|name| !name.ends_with("DTS")));
    assert!(partitions.x_train.names.contains(&"GenderFLG.M".to_string()));

    let settings = deploy_settings(dir.path(), Method::Rf, "ReadmitScores");
    create_table(&settings, ModelType::Classification);
    let report = deployment.deploy(&settings).unwrap();

    assert_eq!(report.written, SCORING_ROWS);
    assert!(report.rows.iter().all(|row| (0.0..=1.0).contains(&row.prediction)));
    let expected: Vec<i64> = (0..SCORING_ROWS as i64).map(|i| 1000 + TRAINING_ROWS as i64 + i).collect();
    assert_eq!(stored_grains(&settings), expected);
}

#[test]
fn saved_models_reproduce_earlier_scores() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("extract.csv");
    write_extract(&data);
    let deployment = prepare(&data, ModelType::Classification, true);

    let mut settings = deploy_settings(dir.path(), Method::Linear, "main.ReadmitScores");
    create_table(&settings, ModelType::Classification);
    let first = deployment.deploy(&settings).unwrap();

    settings.use_saved_model = true;
    let second = deployment.deploy(&settings).unwrap();

    let first_scores: Vec<f64> = first.rows.iter().map(|row| row.prediction).collect();
    let second_scores: Vec<f64> = second.rows.iter().map(|row| row.prediction).collect();
    assert_eq!(first_scores, second_scores);
    assert_eq!(stored_grains(&settings).len(), 2 * SCORING_ROWS);
}

#[test]
fn regression_writes_predicted_values() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("extract.csv");
    write_extract(&data);
    let deployment = prepare(&data, ModelType::Regression, true);

    let settings = deploy_settings(dir.path(), Method::Linear, "A1CEstimates");
    create_table(&settings, ModelType::Regression);
    let report = deployment.deploy(&settings).unwrap();
    assert_eq!(report.rows.len(), SCORING_ROWS);

    let connection = open_database(&settings.database, false).unwrap();
    let total: f64 = connection
        .query_row("SELECT SUM(\"PredictedValueNBR\") FROM \"A1CEstimates\"", [], |row| row.get(0))
        .unwrap();
    assert!(total.is_finite());
}

#[test]
fn saved_model_from_another_method_is_refused() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("extract.csv");
    write_extract(&data);
    let deployment = prepare(&data, ModelType::Classification, true);

    let mut settings = deploy_settings(dir.path(), Method::Linear, "ReadmitScores");
    create_table(&settings, ModelType::Classification);
    deployment.deploy(&settings).unwrap();

    settings.method = Method::Rf;
    settings.use_saved_model = true;
    assert!(matches!(deployment.deploy(&settings), Err(DeployError::Model(_))));
}
