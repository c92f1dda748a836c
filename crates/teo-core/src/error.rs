/// Teo core error type. Travels boxed inside a [std::io::Error], so every
/// fallible teo api can return a plain [std::io::Result].
pub struct Error {
    /// Error identifier.
    pub id: String,

    /// Additional error information.
    pub info: String,
}

impl From<Error> for std::io::Error {
    #[inline]
    fn from(e: Error) -> Self {
        std::io::Error::other(e)
    }
}

impl Error {
    /// Construct a new error instance with input as an identifier.
    pub fn id<T>(t: T) -> std::io::Error
    where
        T: Into<String>,
    {
        Self::id_info(t, String::new())
    }

    /// Construct a new error instance with an identifier
    /// and additional info.
    pub fn id_info<T, I>(t: T, i: I) -> std::io::Error
    where
        T: Into<String>,
        I: Into<String>,
    {
        Self {
            id: t.into(),
            info: i.into(),
        }
        .into()
    }

    /// Wrap a foreign error, keeping its message as info.
    pub fn err<E>(e: E) -> std::io::Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::id_info("Error", e.into().to_string())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)?;
        if !self.info.is_empty() {
            f.write_str(": ")?;
            f.write_str(&self.info)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

/// Extension trait to extract an identifier from an io error.
pub trait ErrorExt {
    /// The identifier if this wraps a teo [Error],
    /// otherwise the string representation.
    fn id(&self) -> std::borrow::Cow<'_, str>;
}

impl ErrorExt for std::io::Error {
    #[inline]
    fn id(&self) -> std::borrow::Cow<'_, str> {
        match self.get_ref() {
            Some(r) => match r.downcast_ref::<Error>() {
                Some(r) => (&r.id).into(),
                None => r.to_string().into(),
            },
            None => self.to_string().into(),
        }
    }
}

#[doc(inline)]
pub use std::io::Result;
