pub mod authenticate;
pub mod authorize;
pub mod metrics;
pub mod panic;
pub mod pipeline;
pub mod rate_limit;
pub mod response;

pub use authorize::{Activated, Authenticated, Authorized, Capability, MoviesRead, MoviesWrite};
pub use pipeline::{request_pipeline, Pipeline, RequestContext, Stage, Verdict};
pub use response::{ApiResponse, ApiResult, ValidJson};
