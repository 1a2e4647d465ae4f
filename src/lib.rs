pub mod build_info;
pub mod config;
pub mod constants;
pub mod error;
pub mod pipeline;

pub mod util {
    pub mod feature_engineering;
    pub mod file_utils;
    pub mod json_float;
    pub mod metrics;
    pub mod model_logger;
    pub mod pre_processor;
    #[cfg(test)]
    pub mod test_utils;
}

pub mod grid {
    pub mod step_1_tensor_preparation;
    pub mod step_2_lstm_cell;
    pub mod step_3_lstm_model_arch;
    pub mod step_4_train_model;
    pub mod step_5_prediction;
    pub mod step_6_model_serialization;
}
