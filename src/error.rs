use thiserror::Error;

use crate::{ir::RegisterClass, utils::graph::NodeId};

macro_rules! invariant_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvariantViolation {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvariantViolation {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The error type for every fallible operation of this library.
///
/// All variants are fatal for the compilation unit that produced them: an
/// allocation either completes or the unit is abandoned. None of them is
/// meant to be recovered from by retrying with the same input.
///
/// # Error Categories
///
/// ## Input Contract Errors
/// - [`Error::InvalidGraph`] - Structural problem in the control-flow graph
/// - [`Error::CriticalEdge`] - An edge that needs a block of its own
/// - [`Error::IrreducibleLoop`] - Control flow the allocator cannot linearize
///
/// ## Allocation Errors
/// - [`Error::InvariantViolation`] - Internal bookkeeping contradiction
/// - [`Error::OutOfRegisters`] - Every register of a class is pinned at a position that needs one
/// - [`Error::ValidationFailed`] - Two intervals share a location while both live
///
/// # Examples
///
/// ```rust
/// use linscan::Error;
///
/// fn report(err: &Error) -> String {
///     match err {
///         Error::InvariantViolation { message, file, line } => {
///             format!("compiler bug at {file}:{line}: {message}")
///         }
///         Error::ValidationFailed { conflicts, .. } => conflicts.join("\n"),
///         other => other.to_string(),
///     }
/// }
/// # let _ = report;
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A compiler invariant does not hold.
    ///
    /// Raised for splitting before an interval's start, a value used without a
    /// reaching definition, overlapping destinations inside one parallel move
    /// and similar contradictions. The error records the source location that
    /// detected it.
    #[error("Invariant violation - {file}:{line}: {message}")]
    InvariantViolation {
        /// Description of the violated invariant
        message: String,
        /// The source file in which this error occurred
        file: &'static str,
        /// The source line in which this error occurred
        line: u32,
    },

    /// No register of `class` can be handed to an interval that requires one.
    ///
    /// Only happens when fixed intervals pin every register of the class at
    /// `position`, which means the target description is too small for the
    /// instruction being compiled.
    #[error("Ran out of {class} registers at position {position}")]
    OutOfRegisters {
        /// The register class that was exhausted
        class: RegisterClass,
        /// The lifetime position at which allocation failed
        position: usize,
    },

    /// The graph contains a loop entered other than through its header.
    #[error("Irreducible control flow entering {0}")]
    IrreducibleLoop(NodeId),

    /// The graph contains an edge from a block with several successors to a
    /// block with several predecessors.
    #[error("Critical edge {from} -> {to} must be split before allocation")]
    CriticalEdge {
        /// Source block of the edge
        from: NodeId,
        /// Target block of the edge
        to: NodeId,
    },

    /// The control-flow graph handed in is structurally broken.
    #[error("Invalid graph - {0}")]
    InvalidGraph(String),

    /// The validator found intervals sharing a location while both are live.
    ///
    /// `conflicts` carries one line per conflicting pair, naming the position,
    /// the location and both intervals.
    #[error("Register allocation validation failed for {class} registers: {} conflict(s)", conflicts.len())]
    ValidationFailed {
        /// The register class whose intervals conflict
        class: RegisterClass,
        /// Dump of every conflict found
        conflicts: Vec<String>,
    },
}
