//! 服务模块

pub mod generation;
pub mod persona_responder;
pub mod persona_store;
pub mod statistics;

pub use generation::{
    ChatReply, GenerationOutput, TextGenerator, create_text_generator,
};
pub use persona_responder::PersonaResponder;
pub use persona_store::{
    FsPersonaStore, PersonaLocks, PersonaStore, PersonaStoreBuilder, StoreHandle, StoreOrigin,
    validate_persona_name,
};
pub use statistics::{aggregate, sender_names};
