use snafu::Snafu;

use crate::service::ImportReport;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum LetrackerError {
    #[snafu(display("grade must be between 0 and 3, got {value}"))]
    InvalidGrade { value: i64 },
    #[snafu(display("timestamp {value} is out of range"))]
    InvalidTimestamp { value: i64 },
    #[snafu(display("cannot replay an empty history"))]
    EmptyHistory,
    #[snafu(display("item {item_id} does not exist"))]
    ItemNotFound { item_id: i64 },
    #[snafu(display("sqlite: {source}"))]
    Sqlite { source: rusqlite::Error },
    #[snafu(display("storage: {message}"))]
    Storage { message: String },
    #[snafu(display("import stopped while persisting `{slug}`: {source}"))]
    ImportHalted {
        slug: String,
        report: ImportReport,
        #[snafu(source(from(LetrackerError, Box::new)))]
        source: Box<LetrackerError>,
    },
}

pub type Result<T, E = LetrackerError> = std::result::Result<T, E>;
