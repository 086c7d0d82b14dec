pub mod advertise;
#[allow(clippy::result_large_err)]
pub mod receive_pack;
pub mod upload_pack;

pub use advertise::{advertise_refs, collect_refs, format_ref_advertisement, AdvertisedRef, Service};
pub use receive_pack::{
    GitReceivePack, PushReport, PushRequest, RefUpdate, RefUpdateResult, StaleRef,
    FORCE_PUSH_OPTION,
};
pub use upload_pack::{stream_response, GitUploadPack, UploadPackResponse};
