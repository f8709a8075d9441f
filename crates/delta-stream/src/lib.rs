//! Coalescing of streamed bot replies.
//!
//! A backend streams a reply as a run of `interim` event activities, each
//! carrying one text fragment. [`DeltaMessage`] accumulates those fragments,
//! [`ActivityClassifier`] decides what every incoming activity means and turns
//! it into a display-ready [`Card`], and [`gate::admit`] is the check a
//! renderer runs before showing any card so superseded interim text is not
//! displayed again.
//!
//! The accumulator is a plain value owned by the session; the classifier and
//! the gate borrow it mutably, one activity or render pass at a time.

pub mod card;
pub mod classifier;
pub mod delta;
pub mod gate;

pub use card::{Card, CardMetadata, Framing};
pub use classifier::{ActivityClassifier, Classified, Dispatch, INTERIM_EVENT, STEP_PREFIX};
pub use delta::{DeltaMessage, DeltaStatus};
pub use gate::{admit, Admission};
