use super::*;

/// The primary block dictionary: NUL-terminated strings laid back to back.
///
/// Endpoint ids are carried on the wire as byte offsets of their scheme and
/// ssp strings within this blob. `add` deduplicates, so two blocks naming
/// the same endpoint share its bytes.
#[derive(Default, Debug, Clone)]
pub struct Dictionary {
    data: Vec<u8>,
}

impl Dictionary {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Replaces the dictionary with a received blob, which must end with NUL.
    pub fn set_raw(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() || data[data.len() - 1] != 0 {
            return Err(Error::BadDictionary);
        }
        self.data = data.to_vec();
        Ok(())
    }

    fn offset_of(&self, s: &str) -> Option<u64> {
        let mut offset = 0;
        while offset < self.data.len() {
            let len = self.data[offset..]
                .iter()
                .position(|b| *b == 0)
                .unwrap_or(self.data.len() - offset);
            if &self.data[offset..offset + len] == s.as_bytes() {
                return Some(offset as u64);
            }
            offset += len + 1;
        }
        None
    }

    fn add_str(&mut self, s: &str) -> u64 {
        if let Some(offset) = self.offset_of(s) {
            return offset;
        }
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        offset
    }

    /// Adds both halves of `eid`, returning their (scheme, ssp) offsets.
    pub fn add_eid(&mut self, eid: &Eid) -> (u64, u64) {
        (self.add_str(eid.scheme()), self.add_str(eid.ssp()))
    }

    /// The offsets of an endpoint id already in the dictionary.
    pub fn offsets(&self, eid: &Eid) -> Option<(u64, u64)> {
        Some((self.offset_of(eid.scheme())?, self.offset_of(eid.ssp())?))
    }

    fn str_at(&self, offset: u64) -> Result<&str, Error> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(Error::InvalidEidOffset(offset, self.data.len()));
        }
        let len = self.data[start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(Error::BadDictionary)?;
        core::str::from_utf8(&self.data[start..start + len])
            .map_err(|_| Error::BadDictionary)
    }

    /// Rebuilds an endpoint id from a wire offset pair.
    pub fn extract_eid(&self, scheme_offset: u64, ssp_offset: u64) -> Result<Eid, Error> {
        Ok(Eid::new(self.str_at(scheme_offset)?, self.str_at(ssp_offset)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup() {
        let mut dict = Dictionary::default();
        let a: Eid = "dtn://node-1/ping".parse().unwrap();
        let b: Eid = "dtn://node-2/pong".parse().unwrap();

        let (a_scheme, a_ssp) = dict.add_eid(&a);
        let (b_scheme, b_ssp) = dict.add_eid(&b);

        // both EIDs share the single "dtn" entry
        assert_eq!(a_scheme, 0);
        assert_eq!(b_scheme, 0);
        assert_ne!(a_ssp, b_ssp);
        assert_eq!(dict.add_eid(&a), (a_scheme, a_ssp));

        assert_eq!(dict.extract_eid(a_scheme, a_ssp).unwrap(), a);
        assert_eq!(dict.extract_eid(b_scheme, b_ssp).unwrap(), b);
        assert_eq!(dict.offsets(&b), Some((b_scheme, b_ssp)));
    }

    #[test]
    fn test_bad_offsets() {
        let mut dict = Dictionary::default();
        dict.add_eid(&Eid::null());
        assert!(dict.extract_eid(0, 10_000).is_err());
        assert!(Dictionary::default().extract_eid(0, 0).is_err());
    }

    #[test]
    fn test_set_raw() {
        let mut dict = Dictionary::default();
        assert!(dict.set_raw(b"dtn\0none\0").is_ok());
        assert_eq!(dict.extract_eid(0, 4).unwrap(), Eid::null());
        assert!(dict.set_raw(b"dtn\0none").is_err());
        assert!(dict.set_raw(b"").is_err());
    }
}
