//! Filenames and reserved parameter names fixed by the on-disk layout, kept
//! as plain `&str` constants.

pub const CLUSTER_PARAM_FILE: &str = "param_choice.csv";
pub const CLUSTER_METRIC_FILE: &str = "metrics.csv";
pub const JSON_SETTINGS_FILE: &str = "settings.json";

pub const STATUS_CHECKPOINT_FILE: &str = "status.json";
pub const FULL_DF_FILE: &str = "all_data.csv";
pub const REDUCED_DF_FILE: &str = "reduced_data.csv";
pub const REPORT_DATA_FILE: &str = "report_data.json";
pub const CLUSTER_RUN_LOG_FILE: &str = "cluster_run.log";

pub const WORKING_DIRECTORIES_DIR: &str = "working_directories";
pub const BEST_JOBS_DIR: &str = "best_jobs";

/// Reserved parameter name under which the resume count is tracked; never
/// set directly by the user script.
pub const RESTART_PARAM_NAME: &str = "job_restarts";
pub const ID_PARAM_NAME: &str = "_id";
pub const ITERATION_PARAM_NAME: &str = "_iteration";

/// Suffix `reduced_data.csv` appends to a metric column name to report its
/// standard deviation across restarts of the same setting.
pub const STD_SUFFIX: &str = "__std";

pub const RESERVED_PARAMS: [&str; 3] =
    [ID_PARAM_NAME, ITERATION_PARAM_NAME, RESTART_PARAM_NAME];

/// Token resolved once, at parameter-tree construction time, to the
/// orchestrator's launch time.
pub const TIMESTAMP_TOKEN: &str = "__timestamp__";

/// Delimiters for a cross-parameter reference, e.g. `${model.lr}`,
/// resolved once against the fully-merged parameter tree at construction
/// time, before the tree is frozen immutable.
pub const PARAM_REF_OPEN: &str = "${";
pub const PARAM_REF_CLOSE: char = '}';

/// Grace period between `CONCLUDED_WITHOUT_RESULTS` and declaring the job
/// `FAILED` if no metrics CSV has appeared.
pub const CONCLUDED_WITHOUT_RESULTS_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Control loop tick interval.
pub const LOOP_SLEEP_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

/// Failure-budget slack term: the loop aborts once
/// `n_failed > n_successful + n_running + FAILURE_BUDGET_SLACK`.
pub const FAILURE_BUDGET_SLACK: u64 = 5;
