pub mod annotation;
pub mod command;
pub mod extract;
pub mod highlight;
pub mod host;
pub mod import;
pub mod measurement;
pub mod naming;
pub mod picker;
pub mod scene;
pub mod store;
pub mod viewer;

pub mod errors {
    use piero_io::IoError;
    use thiserror::Error;
    use uuid::Uuid;

    #[derive(Debug, Error)]
    pub enum EngineError {
        /// 调用顺序错误（例如高亮前未解析拾取要素），属于契约违例，调用方应视为致命错误。
        #[error("missing collaborator state: {0}")]
        MissingState(&'static str),
        #[error("annotation {0} not found")]
        AnnotationNotFound(Uuid),
        #[error("measure {0} not found")]
        MeasureNotFound(Uuid),
        #[error(transparent)]
        Io(#[from] IoError),
    }
}

pub use errors::EngineError;
pub use viewer::Viewer;
