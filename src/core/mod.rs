mod errors;
mod gallery;
mod manager;
mod progress;
mod request;
mod session;
mod task;
mod traits;
mod types;
mod worker;

pub use errors::{Result, UploadError};
pub use gallery::{GroupPreparer, Preparation};
pub use manager::{Batch, BatchHandle, BatchManager};
pub use progress::{channel, BatchReceivers, EventSink};
pub use request::{
    mime_for,
    BodyPart,
    BodyStream,
    HttpRequest,
    MultipartBody,
    OutgoingRequest,
    PreparedRequest,
    RawResponse,
    RequestBody,
};
pub use session::{HttpGalleryApi, HttpSessionFactory, HttpTransport, USER_AGENT};
pub use task::UploadTask;
pub use traits::{
    GalleryApi,
    NetworkSession,
    PluginBackend,
    PluginRegistry,
    PluginUpload,
    SessionFactory,
    Transport,
    UploadBackend,
};
pub use types::{
    AuxParams,
    BatchSummary,
    GalleryData,
    ImageLinks,
    ProgressEvent,
    TransferSettings,
    UploadGroup,
    UploadResult,
    UploadState,
};
pub use worker::TransferWorker;
