use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not initialize logging")]
    Logging,
    #[display("could not open file storage")]
    Storage,
    #[display("could not open metadata database")]
    Database,
    #[display("operation failed")]
    Engine,
    #[display("could not listen for shutdown signals")]
    Signal,
}
