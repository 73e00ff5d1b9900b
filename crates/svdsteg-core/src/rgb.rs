//! Per-colour-channel container.

use std::future::Future;

use serde::{Deserialize, Serialize};

/// One value per colour channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb<T> {
    pub red: T,
    pub green: T,
    pub blue: T,
}

impl<T> Rgb<T> {
    pub fn new(red: T, green: T, blue: T) -> Self {
        Self { red, green, blue }
    }

    /// Build each channel with the same constructor.
    pub fn from_fn(mut f: impl FnMut() -> T) -> Self {
        Self {
            red: f(),
            green: f(),
            blue: f(),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Rgb<U> {
        Rgb {
            red: f(self.red),
            green: f(self.green),
            blue: f(self.blue),
        }
    }

    /// Combine channel-wise with a second set of values.
    pub fn zip_with<U, V>(self, other: Rgb<U>, mut f: impl FnMut(T, U) -> V) -> Rgb<V> {
        Rgb {
            red: f(self.red, other.red),
            green: f(self.green, other.green),
            blue: f(self.blue, other.blue),
        }
    }

    pub fn as_ref(&self) -> Rgb<&T> {
        Rgb {
            red: &self.red,
            green: &self.green,
            blue: &self.blue,
        }
    }

    /// Channels in R, G, B order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        [&self.red, &self.green, &self.blue].into_iter()
    }
}

impl<T, E> Rgb<Result<T, E>> {
    /// First error wins, in R, G, B order.
    pub fn transpose(self) -> Result<Rgb<T>, E> {
        Ok(Rgb {
            red: self.red?,
            green: self.green?,
            blue: self.blue?,
        })
    }
}

impl<F, T, E> Rgb<F>
where
    F: Future<Output = Result<T, E>>,
{
    /// Await all three channels; fails fast on the first error.
    pub async fn try_join(self) -> Result<Rgb<T>, E> {
        let (red, green, blue) = futures::future::try_join3(self.red, self.green, self.blue).await?;
        Ok(Rgb { red, green, blue })
    }
}
