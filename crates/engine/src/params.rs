//! Solver control parameters.
//!
//! Every field is independently defaulted, so partial records deserialize.

use serde::{Deserialize, Serialize};

/// How much the engine writes to its terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgLevel {
    /// No output.
    Off,
    /// Errors and warnings only.
    Err,
    /// Normal output: progress lines and the final status.
    On,
    /// Everything, including headers and preprocessing notes.
    #[default]
    All,
}

/// Scaling applied to constraint rows before the simplex runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
    /// Use coefficients as given.
    Off,
    /// Divide every constraint row by its largest absolute coefficient.
    #[default]
    Auto,
}

/// Branching variable selection for the branch-and-bound search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branching {
    /// Lowest-index fractional integer column.
    FirstFractional,
    /// Highest-index fractional integer column.
    LastFractional,
    /// Column whose fractional part is closest to one half.
    #[default]
    MostFractional,
}

/// Parameters for the simplex and exact-simplex entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplexOptions {
    /// Terminal output level. Default: [`MsgLevel::All`].
    pub msg_level: MsgLevel,
    /// Announce and run the LP preprocessing pass. Default: off.
    pub presolve: bool,
    /// Row scaling mode. Default: [`Scaling::Auto`].
    pub scaling: Scaling,
    /// Maximum number of pivots before giving up. Default: unlimited.
    pub iteration_limit: Option<u64>,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            msg_level: MsgLevel::All,
            presolve: false,
            scaling: Scaling::Auto,
            iteration_limit: None,
        }
    }
}

/// Parameters for the interior-point entry point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteriorOptions {
    /// Terminal output level. Default: [`MsgLevel::All`].
    pub msg_level: MsgLevel,
}

/// Parameters for the branch-and-bound search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MipOptions {
    /// Terminal output level. Default: [`MsgLevel::All`].
    pub msg_level: MsgLevel,
    /// Run the MIP preprocessor and solve the root relaxation inside the
    /// search. Without it, an optimal LP solution must already exist.
    /// Default: off.
    pub presolve: bool,
    /// Branching rule. Default: [`Branching::MostFractional`].
    pub branching: Branching,
    /// Integrality tolerance. Default: `1e-5`.
    pub int_tolerance: f64,
    /// Relative objective tolerance used to fathom nodes. Default: `1e-7`.
    pub obj_tolerance: f64,
    /// Stop after exploring this many nodes. Default: unlimited.
    pub node_limit: Option<u64>,
}

impl Default for MipOptions {
    fn default() -> Self {
        Self {
            msg_level: MsgLevel::All,
            presolve: false,
            branching: Branching::MostFractional,
            int_tolerance: 1e-5,
            obj_tolerance: 1e-7,
            node_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_records_keep_other_defaults() {
        let opts: MipOptions = serde_json::from_str(r#"{"presolve": true}"#).unwrap();
        assert!(opts.presolve);
        assert_eq!(opts.msg_level, MsgLevel::All);
        assert_eq!(opts.branching, Branching::MostFractional);
        assert_eq!(opts.int_tolerance, 1e-5);

        let opts: SimplexOptions = serde_json::from_str(r#"{"msg_level": "off"}"#).unwrap();
        assert_eq!(opts.msg_level, MsgLevel::Off);
        assert_eq!(opts.scaling, Scaling::Auto);
    }

    #[test]
    fn message_levels_are_ordered() {
        assert!(MsgLevel::Off < MsgLevel::Err);
        assert!(MsgLevel::On < MsgLevel::All);
    }
}
