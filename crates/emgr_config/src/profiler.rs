//! Typed profile collector parameters.
//!
//! A collector is declared by name in a `<jit>.genProfile` list and described
//! by `<name>.*` properties, e.g.
//!
//! ```text
//! EB_PROF.profilerType=EB_PROFILER
//! EB_PROF.mode=ASYNC
//! EB_PROF.entryThreshold=1000
//! EB_PROF.backedgeThreshold=10000
//! EB_PROF.tbsTimeout=5
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::properties::Properties;

pub const DEFAULT_ENTRY_THRESHOLD: u32 = 1000;
pub const DEFAULT_BACKEDGE_THRESHOLD: u32 = 10_000;
pub const DEFAULT_TBS_TIMEOUT: u32 = 5;
pub const DEFAULT_TBS_INITIAL_TIMEOUT: u32 = 0;
pub const DEFAULT_STEADY_SIZE: usize = 4;
pub const DEFAULT_CLEAR_SIZE: usize = 0;
pub const DEFAULT_CLEAR_INTERVAL: u32 = 1000;

/// Error produced by the `FromStr` impls below; carries the rejected text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

macro_rules! config_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

config_enum! {
    /// Which collector strategy a profile name refers to.
    ProfilerType {
        EntryBackedge => "EB_PROFILER",
        Edge => "EDGE_PROFILER",
        Value => "VALUE_PROFILER",
    }
}

config_enum! {
    /// Who tests counters against thresholds.
    ///
    /// `Sync`: emitted code compares and calls back on a crossing.
    /// `Async`: the collector scans its profiles on timer ticks.
    EbMode {
        Sync => "SYNC",
        Async => "ASYNC",
    }
}

config_enum! {
    /// Top-N-value table maintenance algorithm.
    TnvAlgo {
        FirstN => "TNV_FIRST_N",
        Divided => "TNV_DIVIDED",
    }
}

config_enum! {
    /// How value-profile updates interact with concurrent updaters.
    UpdateStrategy {
        Locked => "LOCKED",
        LockedInsert => "LOCKED_INSERT",
        FlaggedAll => "FLAGGED_ALL",
        FlaggedInsert => "FLAGGED_INSERT",
        Unsafe => "UNSAFE",
    }
}

/// Parameters shared by the counter based collectors (entry/backedge, edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterParams {
    pub mode: EbMode,
    pub entry_threshold: u32,
    pub backedge_threshold: u32,
    /// Ticks between scans once scanning started.
    pub tbs_timeout: u32,
    /// Tick of the first scan.
    pub tbs_initial_timeout: u32,
}

impl Default for CounterParams {
    fn default() -> Self {
        Self {
            mode: EbMode::Async,
            entry_threshold: DEFAULT_ENTRY_THRESHOLD,
            backedge_threshold: DEFAULT_BACKEDGE_THRESHOLD,
            tbs_timeout: DEFAULT_TBS_TIMEOUT,
            tbs_initial_timeout: DEFAULT_TBS_INITIAL_TIMEOUT,
        }
    }
}

/// Parameters of a value (TNV) collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueParams {
    pub algo: TnvAlgo,
    pub update_strategy: UpdateStrategy,
    pub steady_size: usize,
    pub clear_size: usize,
    /// Flushes between clear-table resets; 0 never resets.
    pub clear_interval: u32,
}

impl Default for ValueParams {
    fn default() -> Self {
        Self {
            algo: TnvAlgo::FirstN,
            update_strategy: UpdateStrategy::Locked,
            steady_size: DEFAULT_STEADY_SIZE,
            clear_size: DEFAULT_CLEAR_SIZE,
            clear_interval: DEFAULT_CLEAR_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "profilerType")]
pub enum CollectorParams {
    #[serde(rename = "EB_PROFILER")]
    EntryBackedge(CounterParams),
    #[serde(rename = "EDGE_PROFILER")]
    Edge(CounterParams),
    #[serde(rename = "VALUE_PROFILER")]
    Value(ValueParams),
}

impl CollectorParams {
    pub const fn profiler_type(&self) -> ProfilerType {
        match self {
            Self::EntryBackedge(_) => ProfilerType::EntryBackedge,
            Self::Edge(_) => ProfilerType::Edge,
            Self::Value(_) => ProfilerType::Value,
        }
    }
}

/// A fully validated collector declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSpec {
    pub name: String,
    pub params: CollectorParams,
}

impl CollectorSpec {
    /// Read `<name>.*` properties. Any unknown enum value, unparsable number
    /// or inconsistent combination is reported; the caller decides whether
    /// that is fatal (the chain builder only drops this collector).
    pub fn from_properties(name: &str, props: &Properties) -> Result<Self, ConfigError> {
        let type_key = format!("{name}.profilerType");
        let raw_type = props
            .get(&type_key)
            .ok_or_else(|| ConfigError::Missing(type_key.clone()))?;
        let profiler_type = parse_enum::<ProfilerType>(&type_key, raw_type)?;

        let params = match profiler_type {
            ProfilerType::EntryBackedge => {
                CollectorParams::EntryBackedge(read_counter_params(name, props)?)
            }
            ProfilerType::Edge => {
                let params = read_counter_params(name, props)?;
                if params.mode == EbMode::Sync {
                    return Err(ConfigError::Invalid {
                        key: format!("{name}.mode"),
                        reason: "edge profiles are only checked asynchronously".to_string(),
                    });
                }
                CollectorParams::Edge(params)
            }
            ProfilerType::Value => CollectorParams::Value(read_value_params(name, props)?),
        };

        Ok(Self {
            name: name.to_string(),
            params,
        })
    }

    pub const fn profiler_type(&self) -> ProfilerType {
        self.params.profiler_type()
    }
}

fn parse_enum<T: FromStr<Err = UnknownVariant>>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|UnknownVariant(value)| ConfigError::UnknownValue {
        key: key.to_string(),
        value,
    })
}

fn read_enum<T>(props: &Properties, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = UnknownVariant>,
{
    props
        .get(key)
        .map_or(Ok(default), |raw| parse_enum(key, raw))
}

fn read_counter_params(name: &str, props: &Properties) -> Result<CounterParams, ConfigError> {
    let defaults = CounterParams::default();
    let params = CounterParams {
        mode: read_enum(props, &format!("{name}.mode"), defaults.mode)?,
        entry_threshold: props
            .get_number(&format!("{name}.entryThreshold"))?
            .unwrap_or(defaults.entry_threshold),
        backedge_threshold: props
            .get_number(&format!("{name}.backedgeThreshold"))?
            .unwrap_or(defaults.backedge_threshold),
        tbs_timeout: props
            .get_number(&format!("{name}.tbsTimeout"))?
            .unwrap_or(defaults.tbs_timeout),
        tbs_initial_timeout: props
            .get_number(&format!("{name}.tbsInitialTimeout"))?
            .unwrap_or(defaults.tbs_initial_timeout),
    };

    if params.mode == EbMode::Async && params.tbs_timeout == 0 {
        return Err(ConfigError::Invalid {
            key: format!("{name}.tbsTimeout"),
            reason: "asynchronous collectors need a non-zero timeout".to_string(),
        });
    }

    Ok(params)
}

fn read_value_params(name: &str, props: &Properties) -> Result<ValueParams, ConfigError> {
    let defaults = ValueParams::default();
    let params = ValueParams {
        algo: read_enum(props, &format!("{name}.vpalgo"), defaults.algo)?,
        update_strategy: read_enum(
            props,
            &format!("{name}.updateStrategy"),
            defaults.update_strategy,
        )?,
        steady_size: props
            .get_number(&format!("{name}.vpSteadySize"))?
            .unwrap_or(defaults.steady_size),
        clear_size: props
            .get_number(&format!("{name}.vpClearSize"))?
            .unwrap_or(defaults.clear_size),
        clear_interval: props
            .get_number(&format!("{name}.vpClearInterval"))?
            .unwrap_or(defaults.clear_interval),
    };

    if params.steady_size == 0 {
        return Err(ConfigError::Invalid {
            key: format!("{name}.vpSteadySize"),
            reason: "steady table must hold at least one value".to_string(),
        });
    }
    if params.algo == TnvAlgo::Divided && params.clear_size == 0 {
        return Err(ConfigError::Invalid {
            key: format!("{name}.vpClearSize"),
            reason: "TNV_DIVIDED needs a clear table".to_string(),
        });
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(text: &str) -> Properties {
        Properties::parse(text).unwrap()
    }

    #[test]
    fn test_enum_round_trip_through_text() {
        assert_eq!("EB_PROFILER".parse(), Ok(ProfilerType::EntryBackedge));
        assert_eq!("FLAGGED_INSERT".parse(), Ok(UpdateStrategy::FlaggedInsert));
        assert_eq!(TnvAlgo::Divided.to_string(), "TNV_DIVIDED");
        assert_eq!(
            "QUICK".parse::<EbMode>(),
            Err(UnknownVariant("QUICK".to_string()))
        );
    }

    #[test]
    fn test_entry_backedge_spec() {
        let spec = CollectorSpec::from_properties(
            "EB_PROF",
            &props(
                "EB_PROF.profilerType=EB_PROFILER\nEB_PROF.mode=SYNC\nEB_PROF.entryThreshold=50\n",
            ),
        )
        .unwrap();

        let CollectorParams::EntryBackedge(params) = spec.params else {
            panic!("expected entry/backedge params");
        };
        assert_eq!(params.mode, EbMode::Sync);
        assert_eq!(params.entry_threshold, 50);
        assert_eq!(params.backedge_threshold, DEFAULT_BACKEDGE_THRESHOLD);
    }

    #[test]
    fn test_value_spec() {
        let spec = CollectorSpec::from_properties(
            "VP",
            &props(
                "VP.profilerType=VALUE_PROFILER\nVP.vpalgo=TNV_DIVIDED\nVP.updateStrategy=FLAGGED_ALL\nVP.vpSteadySize=2\nVP.vpClearSize=1\nVP.vpClearInterval=10\n",
            ),
        )
        .unwrap();

        assert_eq!(
            spec.params,
            CollectorParams::Value(ValueParams {
                algo: TnvAlgo::Divided,
                update_strategy: UpdateStrategy::FlaggedAll,
                steady_size: 2,
                clear_size: 1,
                clear_interval: 10,
            })
        );
    }

    #[test]
    fn test_missing_or_unknown_type() {
        let err = CollectorSpec::from_properties("P", &Properties::new()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(key) if key == "P.profilerType"));

        let err = CollectorSpec::from_properties("P", &props("P.profilerType=HEAT_PROFILER"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownValue { .. }));
    }

    #[test]
    fn test_unknown_mode_and_bad_number() {
        let err = CollectorSpec::from_properties(
            "P",
            &props("P.profilerType=EB_PROFILER\nP.mode=LAZY"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownValue { key, .. } if key == "P.mode"));

        let err = CollectorSpec::from_properties(
            "P",
            &props("P.profilerType=EB_PROFILER\nP.entryThreshold=-3"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn test_inconsistent_combinations() {
        let err = CollectorSpec::from_properties(
            "E",
            &props("E.profilerType=EDGE_PROFILER\nE.mode=SYNC"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "E.mode"));
        let spec = CollectorSpec::from_properties(
            "E",
            &props("E.profilerType=EDGE_PROFILER\nE.mode=ASYNC"),
        )
        .unwrap();
        assert!(matches!(spec.params, CollectorParams::Edge(_)));

        let err = CollectorSpec::from_properties(
            "V",
            &props("V.profilerType=VALUE_PROFILER\nV.vpalgo=TNV_DIVIDED"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key, .. } if key == "V.vpClearSize"));

        let err = CollectorSpec::from_properties(
            "A",
            &props("A.profilerType=EB_PROFILER\nA.tbsTimeout=0"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
