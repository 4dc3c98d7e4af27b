mod matching;
mod profile;
mod request_log;
mod search;
mod sync;

pub use matching::{
    Candidate, MatchEntry, MatchRequest, MatchResult, RetrievalSource, Urgency,
};
pub use profile::{Availability, AvailabilitySlot, Location, Profile, Rating, Weekday};
pub use request_log::RequestLogEntry;
pub use search::{
    IndexedDocument, ProfileFilter, SearchDocument, SearchFilter, SearchHit, SearchQuery,
    normalize_place,
};
pub use sync::{
    ChangeEvent, ChangeOp, DeadLetter, Discrepancy, EventPhase, FeedReport, FullResyncReport,
    IncrementalSyncReport, SyncCursor, SyncStatus, VerifyReport,
};
