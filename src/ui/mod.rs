//! Terminal output
//!
//! Uses `cliclack` for step output and prompts, with plain-text fallback
//! when stdout is not a terminal or a CI environment is detected.
//!
//! # Example
//!
//! ```rust,ignore
//! use lvcache::ui::{self, UiContext, FlushProgressBar};
//!
//! let ctx = UiContext::detect().with_auto_yes(args.yes);
//!
//! ui::intro(&ctx, "Remove cache vg0/data");
//! let bar = FlushProgressBar::new(&ctx, "vg0/data");
//! // ... hand bar.hook() to the command context ...
//! bar.finish();
//! ui::outro_success(&ctx, "Cache removed");
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, outro_success, remark, step_error_detail, step_info, step_ok, step_ok_detail,
    step_warn_hint,
};
pub use progress::FlushProgressBar;
pub use prompts::confirm;
pub use theme::{init_theme, LvCacheTheme};
