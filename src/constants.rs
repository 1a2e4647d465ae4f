// Input files
pub const DATA_FILE: &str = "./assets/LD2011_2014.csv";
pub const PRODUCTION_FORECAST_FILE: &str = "./assets/AUSTRIA_2015_2021.csv";

// Raw CSV layout
pub const CSV_SEPARATOR: u8 = b';';
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%y %H:%M";
pub const LOAD_SCALE_DIVISOR: f64 = 1000.0; // Sum of meters in W -> kW
pub const FORECAST_COLUMN: &str = "FORECAST";
pub const ACTUAL_COLUMN: &str = "ACTUAL";

// Column names of the cleaned and featurized tables
pub const TIMESTAMP_COLUMN: &str = "timestamp";
pub const LOAD_COLUMN: &str = "load";
pub const DATE_COLUMN: &str = "date";
pub const DAY_OF_YEAR_COLUMN: &str = "day_of_year";
pub const MINUTES_OF_DAY_COLUMN: &str = "minutes_of_day";
pub const DAY_SIN_COLUMN: &str = "day_sin";
pub const MINUTE_SIN_COLUMN: &str = "minute_sin";

// Calendar periods of the sinusoidal encodings
pub const DAYS_PER_YEAR: f64 = 365.0;
pub const MINUTES_PER_DAY: f64 = 1440.0; // 60 * 24

// Windowing
pub const WINDOW_SIZE: usize = 19; // Readings per input sequence
pub const FEATURES_PER_STEP: usize = 3; // day_sin, minute_sin, load

// Model parameters
pub const HIDDEN_SIZE: usize = 64;
pub const NUM_LAYERS: usize = 4;
pub const OUTPUT_SIZE: usize = 1;

// Training parameters
pub const BATCH_SIZE: usize = 64;
pub const EPOCHS: usize = 300;
pub const LEARNING_RATE: f64 = 0.001;
pub const TEST_SPLIT_RATIO: f64 = 0.2; // 20% of windows held out
pub const SPLIT_SEED: u64 = 42;

// Output locations
pub const EXPORT_PATH: &str = "./build/grid_predictor";
pub const RUNS_DIR: &str = "./runs";

// Export verification
pub const EXPORT_TOLERANCE: f64 = 1e-5;
pub const DUMMY_INPUT_SEED: u64 = 7;

// Metric tags
pub const TAG_TRAIN_LOSS: &str = "Loss/train";
pub const TAG_TRAIN_R2: &str = "R2/train";
pub const TAG_EVAL_R2: &str = "R2/eval";
pub const TAG_PRODUCTION_R2: &str = "R2/production";
