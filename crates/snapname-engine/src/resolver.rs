use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;

/// Tracks every filename that exists or has been handed out during a run.
///
/// Seeded from the directory listing and updated by [`ConflictResolver::claim`],
/// so two files labelled alike in the same run never race for one name. Names
/// compare case-insensitively to stay safe on case-folding filesystems.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    taken: HashSet<String>,
}

impl ConflictResolver {
    pub fn from_listing<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            taken: names.into_iter().map(|name| fold(name.as_ref())).collect(),
        }
    }

    /// Seeds from every entry currently in `dir`, files and directories alike.
    pub fn scan(dir: &Path) -> io::Result<Self> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        Ok(Self::from_listing(names))
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(&fold(name))
    }

    /// First free name among `base+ext`, `base_1+ext`, `base_2+ext`, ...
    ///
    /// Pure: nothing is reserved.
    pub fn resolve(&self, base: &str, ext: &str) -> String {
        let candidate = format!("{base}{ext}");
        if !self.is_taken(&candidate) {
            return candidate;
        }
        let mut counter: u64 = 1;
        loop {
            let candidate = format!("{base}_{counter}{ext}");
            if !self.is_taken(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Marks `name` as taken. Returns false when it already was.
    pub fn reserve(&mut self, name: &str) -> bool {
        self.taken.insert(fold(name))
    }

    pub fn release(&mut self, name: &str) {
        self.taken.remove(&fold(name));
    }

    /// [`resolve`](Self::resolve) then [`reserve`](Self::reserve).
    pub fn claim(&mut self, base: &str, ext: &str) -> String {
        let name = self.resolve(base, ext);
        self.reserve(&name);
        name
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::ConflictResolver;

    #[test]
    fn resolves_past_existing_suffixes() {
        let resolver = ConflictResolver::from_listing(["Cat.jpg", "Cat_1.jpg"]);
        assert_eq!(resolver.resolve("Cat", ".jpg"), "Cat_2.jpg");
        assert_eq!(resolver.resolve("Dog", ".jpg"), "Dog.jpg");
    }

    #[test]
    fn resolve_is_pure() {
        let resolver = ConflictResolver::from_listing(["Cat.jpg"]);
        assert_eq!(resolver.resolve("Cat", ".jpg"), "Cat_1.jpg");
        assert_eq!(resolver.resolve("Cat", ".jpg"), "Cat_1.jpg");
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn claims_within_one_run_never_collide() {
        let mut resolver = ConflictResolver::default();
        assert_eq!(resolver.claim("Sunset", ".jpg"), "Sunset.jpg");
        assert_eq!(resolver.claim("Sunset", ".jpg"), "Sunset_1.jpg");
        assert_eq!(resolver.claim("Sunset", ".jpg"), "Sunset_2.jpg");
    }

    #[test]
    fn extension_is_part_of_the_name() {
        let resolver = ConflictResolver::from_listing(["Cat.png"]);
        assert_eq!(resolver.resolve("Cat", ".jpg"), "Cat.jpg");
    }

    #[test]
    fn names_compare_case_insensitively() {
        let resolver = ConflictResolver::from_listing(["cat.JPG"]);
        assert!(resolver.is_taken("Cat.jpg"));
        assert_eq!(resolver.resolve("Cat", ".jpg"), "Cat_1.jpg");
    }

    #[test]
    fn release_frees_a_name() {
        let mut resolver = ConflictResolver::default();
        assert!(resolver.reserve("temp_retry_00000000.png"));
        assert!(!resolver.reserve("temp_retry_00000000.png"));
        resolver.release("temp_retry_00000000.png");
        assert!(!resolver.is_taken("temp_retry_00000000.png"));
        assert!(resolver.is_empty());
    }

    #[test]
    fn scan_reads_the_directory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("Cat.jpg"), b"x")?;
        fs::create_dir(temp.path().join("Cat_1.jpg"))?;
        let resolver = ConflictResolver::scan(temp.path())?;
        assert_eq!(resolver.resolve("Cat", ".jpg"), "Cat_2.jpg");
        Ok(())
    }
}
