//! reelcard renders a social post as a card above a letterboxed copy of its video clip,
//! producing one 1080x1920 H.264 file.

pub mod card;
pub mod compositor;
pub mod encoding;
pub mod error;
pub mod error_codes;
pub mod external;
pub mod font_assets;
pub mod layout;
pub mod pipeline;
pub mod post_text;
pub mod probe;
pub mod raster;
pub mod schema;
pub mod wrap;

pub use card::{render_card, render_card_to_file, CardRequest, ProfileSpec, RenderedCard};
pub use error::{ReelError, ReelResult};
pub use layout::{compute_layout, CanvasGeometry};
pub use pipeline::{ReelRenderer, RenderJob, RenderReport};
pub use schema::RenderConfig;
