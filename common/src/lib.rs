pub mod comfort;
pub mod config;
pub mod control;
pub mod learner;
pub mod period;
pub mod savings;
pub mod series;
pub mod topics;
pub mod types;

pub use config::{
    AttributeMap, ComfortTuning, DeviceConfig, HistoryApiConfig, MqttConfig, RuntimeConfig,
};
pub use control::{ActionLogEntry, ActionSource, ControlEngine, ControlState, Verdict};
pub use learner::{OverrideEvent, OverrideLog, OVERRIDE_LOG_CAP};
pub use period::{PeriodWindow, TrackedPeriod};
pub use savings::{Bill, BillComparison, SavingsSummary};
pub use series::{
    aggregate_consumption, date_range, ChartPeriod, ConsumptionBucket, ConsumptionSummary,
    DateRange,
};
pub use topics::*;
pub use types::{
    AcType, ControlAction, ControlMode, DecisionOutput, DeviceProfile, DeviceState, EnergyReading,
    FanLevel, OperationMode, SensorSnapshot, WeatherInfo,
};
