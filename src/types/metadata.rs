use serde::{Deserialize, Serialize};

/// extended attribute (name + value)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Xattr {
    pub name: String,
    pub value: Vec<u8>,
}

impl Xattr {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// insert or replace an xattr by name, keeping the list sorted
    pub fn upsert(xattrs: &mut Vec<Xattr>, xattr: Xattr) {
        match xattrs.binary_search_by(|x| x.name.cmp(&xattr.name)) {
            Ok(i) => xattrs[i] = xattr,
            Err(i) => xattrs.insert(i, xattr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xattr_creation() {
        let x = Xattr::new("security.selinux", vec![1, 2, 3]);
        assert_eq!(x.name, "security.selinux");
        assert_eq!(x.value, vec![1, 2, 3]);
    }

    #[test]
    fn test_upsert_replaces_and_sorts() {
        let mut xattrs = vec![Xattr::new("user.b", vec![2])];

        Xattr::upsert(&mut xattrs, Xattr::new("security.selinux", b"old".to_vec()));
        Xattr::upsert(&mut xattrs, Xattr::new("user.a", vec![1]));
        Xattr::upsert(&mut xattrs, Xattr::new("security.selinux", b"new".to_vec()));

        let names: Vec<_> = xattrs.iter().map(|x| x.name.as_str()).collect();
        assert_eq!(names, vec!["security.selinux", "user.a", "user.b"]);
        assert_eq!(xattrs[0].value, b"new");
    }
}
