//! Pipeline components: context, walk loop, metadata workers, error handling.

pub mod context;
pub mod error_handler;
pub mod metadata;
pub mod orchestrator;
pub mod walk;

pub use context::{
    CollectedEntries, PipelineChannels, PipelineContext, PipelineHandles,
    create_pipeline_channels,
};
pub use error_handler::check_for_initial_error_or_skipped_paths;
pub use metadata::{path_to_entry, spawn_metadata_workers};
pub use orchestrator::{collect_entries, run_pipeline, setup_pipeline_roots};
pub use walk::{WalkOutcome, has_media_extension, run_walk_loop, spawn_walk_thread};
