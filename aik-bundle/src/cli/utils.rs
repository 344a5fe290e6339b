use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;

const NAME_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `bundle_xxxx.bin`, with four random lowercase letters or digits.
pub fn random_bundle_name<R: Rng>(rng: &mut R) -> String {
    let suffix: String = (0..4)
        .map(|_| NAME_CHARSET[rng.gen_range(0..NAME_CHARSET.len())] as char)
        .collect();
    format!("bundle_{}.bin", suffix)
}

pub struct Bar {
    progress: ProgressBar,
}
impl Bar {
    pub fn new<S>(message: S, length: u64) -> Self
        where
            S: AsRef<str>
    {
        let style = ProgressStyle::default_bar()
            .template("{spinner}  {msg:24} [{bar:64.cyan/blue}]  {pos}/{len}")
            .progress_chars("#>-");
        let progress = ProgressBar::new(length);
        progress.set_style(style);
        progress.set_message(message.as_ref());

        Bar { progress }
    }

    pub fn progress(&self, value: u64, len: u64) {
        self.progress.set_length(len);
        self.progress.set_position(value);
    }

    pub fn finish(self) {
        self.progress.finish();
    }

    pub fn abandon(self) {
        self.progress.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_random_bundle_name() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..32 {
            let name = random_bundle_name(&mut rng);
            assert_eq!(name.len(), "bundle_xxxx.bin".len());
            let suffix = &name["bundle_".len().."bundle_".len() + 4];
            assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }
}
