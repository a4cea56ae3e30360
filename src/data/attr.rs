//! Well-known attribute names shared by the decoders and downstream code.

pub const FILE_NAME: &str = "File Name";
pub const DS_TYPE: &str = "DataSet Type";
pub const INST_NAME: &str = "Instrument Name";
pub const INST_TYPE: &str = "Instrument Type";
pub const RUN_TITLE: &str = "Run Title";
pub const RUN_NUM: &str = "Run Number";
pub const END_DATE: &str = "End Date";
pub const END_TIME: &str = "End Time";
pub const NUMBER_OF_PULSES: &str = "Number of Pulses";
pub const GSAS_IPARM: &str = "GSAS Instrument Parameter File";
pub const GSAS_CALIB: &str = "GSAS Calibration";
pub const DETECTOR_IDS: &str = "Detector IDs";
pub const INITIAL_PATH: &str = "Initial Path";
pub const DETECTOR_POS: &str = "Effective Position";
pub const RAW_ANGLE: &str = "Raw Detector Angle";
pub const TIME_FIELD_TYPE: &str = "Time Field Type";
pub const TOTAL_COUNT: &str = "Total Count";
pub const ENERGY_IN: &str = "Energy In";
pub const COLUMN_NAME: &str = "Column Name";

pub const MONITOR_DATA: &str = "Monitor Data";
pub const SAMPLE_DATA: &str = "Sample Data";
