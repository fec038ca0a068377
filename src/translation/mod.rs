/*!
 * Translation planning and checking.
 *
 * - `planner`: strategies and word-bounded batch planning
 * - `validator`: placeholder and protected-term checks on provider output
 * - `prompts`: array prompt construction and reply parsing
 */

// Re-export main types for easier usage
pub use self::planner::{Batch, BatchPlanner, Strategy};
pub use self::validator::{Validation, Validator};

// Submodules
pub mod planner;
pub mod prompts;
pub mod validator;
