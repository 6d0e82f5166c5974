//! Metainfo is a .torrent file with information about the Torrent.

use std::fmt::Display;

use bendy::{
    decoding::{self, Decoder, FromBencode, Object, ResultExt},
    encoding::{self, AsString, SingleItemEncoder, ToBencode},
};
use speedy::{Readable, Writable};

use crate::{
    error::Error,
    tcp_wire::{BlockInfo, BLOCK_LEN},
};

/// SHA-1 of the bencoded `info` dictionary. Peers and trackers identify a
/// torrent by it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Readable, Writable)]
pub struct InfoHash(pub [u8; 20]);

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s[..10])
    }
}

impl From<InfoHash> for [u8; 20] {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct MetaInfo {
    /// URL of the HTTP tracker.
    pub announce: String,
    pub info: Info,
}

impl MetaInfo {
    /// Decode and validate a .torrent file.
    ///
    /// # Errors
    ///
    /// [`Error::BencodeError`] when the buffer is not valid bencode or a
    /// required key is missing, [`Error::MetaInfoInvalid`] when the values
    /// are inconsistent with each other.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        let meta = Self::from_bencode(buf)?;
        meta.info.validate()?;
        Ok(meta)
    }
}

/// in a multi file format, `name` is name of the directory
/// `file_length` is specific to Single File format
/// in a multi file format, `file_length` is replaced to `files`
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Info {
    /// If the torrent has only 1 file, this value is some, and files is none
    pub file_length: Option<usize>,

    /// If the torrent has many files, this is some, and file_length is none.
    pub files: Option<Vec<File>>,

    /// name of the file
    pub name: String,

    /// length in bytes of each piece, the last piece may have a smaller length
    pub piece_length: usize,

    /// A (byte) string consisting of the concatenation of all 20-byte SHA1
    /// hash values, one per piece.
    pub pieces: Vec<u8>,

    /// Computed from the raw bytes of the dictionary, not part of it.
    pub info_hash: InfoHash,
}

impl Info {
    fn validate(&self) -> Result<(), Error> {
        if self.piece_length == 0 {
            return Err(Error::MetaInfoInvalid("`piece length` is zero"));
        }
        if self.pieces.len() % 20 != 0 {
            return Err(Error::MetaInfoInvalid(
                "`pieces` is not a multiple of 20 bytes",
            ));
        }
        if u32::try_from(self.piece_length).is_err() || u32::try_from(self.pieces()).is_err() {
            return Err(Error::MetaInfoInvalid(
                "pieces do not fit the 32 bit fields of the wire protocol",
            ));
        }
        let size = self
            .checked_torrent_size()
            .ok_or(Error::MetaInfoInvalid("total length overflows"))?;
        if self.pieces() != size.div_ceil(self.piece_length) {
            return Err(Error::MetaInfoInvalid(
                "the number of piece hashes does not match the content length",
            ));
        }
        Ok(())
    }

    /// Calculate how many pieces there are.
    #[inline]
    pub fn pieces(&self) -> usize {
        self.pieces.len() / 20
    }

    /// Get the size in bytes of the files of the torrent.
    ///
    /// Saturates on overflow, which [`MetaInfo::from_bytes`] rejects.
    pub fn get_torrent_size(&self) -> usize {
        self.checked_torrent_size().unwrap_or(usize::MAX)
    }

    fn checked_torrent_size(&self) -> Option<usize> {
        match &self.files {
            Some(files) => files.iter().try_fold(0usize, |acc, f| acc.checked_add(f.length)),
            None => Some(self.file_length.unwrap_or(0)),
        }
    }

    /// Get the size (in bytes) of a piece.
    pub fn piece_size(&self, piece_index: usize) -> usize {
        let total_size = self.get_torrent_size();
        if piece_index + 1 == self.pieces() {
            let remainder = total_size % self.piece_length;
            if remainder == 0 { self.piece_length } else { remainder }
        } else {
            self.piece_length
        }
    }

    /// Expected SHA-1 of a piece.
    pub fn piece_hash(&self, piece_index: usize) -> Option<&[u8]> {
        let start = piece_index.checked_mul(20)?;
        self.pieces.get(start..start + 20)
    }

    /// Byte offset of a piece in the content.
    pub fn piece_offset(&self, piece_index: usize) -> u64 {
        piece_index as u64 * self.piece_length as u64
    }

    /// Calculate how many blocks there are in a piece.
    #[inline]
    pub fn blocks_in_piece(&self, piece_index: usize) -> usize {
        self.piece_size(piece_index).div_ceil(BLOCK_LEN as usize)
    }

    /// The requests needed to download a whole piece.
    pub fn get_block_infos_of_piece(&self, piece_index: usize) -> Result<Vec<BlockInfo>, Error> {
        let too_large = |_| Error::MetaInfoInvalid("piece does not fit the wire protocol");

        let index = u32::try_from(piece_index).map_err(too_large)?;
        let piece_size = u32::try_from(self.piece_size(piece_index)).map_err(too_large)?;
        let num_blocks = piece_size.div_ceil(BLOCK_LEN);

        let blocks = (0..num_blocks)
            .map(|block_index| {
                let begin = block_index * BLOCK_LEN;
                let len = if block_index == num_blocks - 1 {
                    piece_size - begin
                } else {
                    BLOCK_LEN
                };

                BlockInfo { index, begin, len }
            })
            .collect();

        Ok(blocks)
    }
}

/// Files in the [`Info`] are relative to the root folder name,
/// but do not contain them as the first item in the vector.
#[derive(Debug, PartialEq, Clone, Default, Hash, Eq)]
pub struct File {
    /// Length of the file in bytes.
    pub length: usize,
    /// Path of the file, excluding the parent name.
    pub path: Vec<String>,
}

impl ToBencode for File {
    const MAX_DEPTH: usize = 5;

    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), encoding::Error> {
        encoder.emit_dict(|mut e| {
            e.emit_pair(b"length", self.length)?;
            e.emit_pair(b"path", &self.path)
        })?;
        Ok(())
    }
}

impl FromBencode for File {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut dict_dec = object.try_into_dictionary()?;
        let mut length = None;
        let mut path: Vec<String> = vec![];

        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"length", value) => {
                    length = usize::decode_bencode_object(value)
                        .context("length")
                        .map(Some)?;
                }
                (b"path", value) => {
                    path = Vec::<String>::decode_bencode_object(value).context("path")?;
                }
                _ => {}
            }
        }

        let length = length.ok_or_else(|| decoding::Error::missing_field("length"))?;

        Ok(Self { length, path })
    }
}

impl ToBencode for MetaInfo {
    const MAX_DEPTH: usize = 5;

    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), encoding::Error> {
        encoder.emit_dict(|mut e| {
            e.emit_pair(b"announce", &self.announce)?;
            e.emit_pair(b"info", &self.info)
        })?;

        Ok(())
    }
}

impl ToBencode for Info {
    const MAX_DEPTH: usize = 5;

    fn encode(&self, encoder: SingleItemEncoder) -> Result<(), encoding::Error> {
        encoder.emit_dict(|mut e| {
            if let Some(files) = &self.files {
                e.emit_pair(b"files", files)?;
            }
            if let Some(file_length) = &self.file_length {
                e.emit_pair(b"length", file_length)?;
            }
            e.emit_pair(b"name", &self.name)?;
            e.emit_pair(b"piece length", self.piece_length)?;
            e.emit_pair(b"pieces", AsString(&self.pieces))
        })?;
        Ok(())
    }
}

impl FromBencode for MetaInfo {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut announce = None;
        let mut info = None;

        let mut dict_dec = object.try_into_dictionary()?;
        while let Some(pair) = dict_dec.next_pair()? {
            match pair {
                (b"announce", value) => {
                    announce = String::decode_bencode_object(value)
                        .context("announce")
                        .map(Some)?;
                }
                (b"info", value) => {
                    info = Info::decode_bencode_object(value).context("info").map(Some)?;
                }
                _ => {}
            }
        }

        let announce = announce.ok_or_else(|| decoding::Error::missing_field("announce"))?;
        let info = info.ok_or_else(|| decoding::Error::missing_field("info"))?;

        Ok(MetaInfo { announce, info })
    }
}

impl FromBencode for Info {
    fn decode_bencode_object(object: Object) -> Result<Self, decoding::Error>
    where
        Self: Sized,
    {
        let mut files = None;
        let mut file_length = None;
        let mut name = None;
        let mut piece_length = None;
        let mut pieces = None;

        // hash the dictionary exactly as it appears in the file, re-encoding
        // it could reorder keys or drop unknown ones
        let bytes = object.try_into_dictionary()?.into_raw()?;

        let mut hash = sha1_smol::Sha1::new();
        hash.update(bytes);
        let info_hash = InfoHash(hash.digest().bytes());

        let mut decoder = Decoder::new(bytes);
        let mut dict = decoder
            .next_object()?
            .ok_or_else(|| decoding::Error::missing_field("info"))?
            .try_into_dictionary()?;

        while let Some(pair) = dict.next_pair()? {
            match pair {
                (b"files", value) => {
                    files = Vec::<File>::decode_bencode_object(value)
                        .context("files")
                        .map(Some)?;
                }
                (b"length", value) => {
                    file_length = usize::decode_bencode_object(value)
                        .context("file.length")
                        .map(Some)?;
                }
                (b"name", value) => {
                    name = String::decode_bencode_object(value).context("name").map(Some)?;
                }
                (b"piece length", value) => {
                    piece_length = usize::decode_bencode_object(value)
                        .context("piece length")
                        .map(Some)?;
                }
                (b"pieces", value) => {
                    pieces = AsString::decode_bencode_object(value)
                        .context("pieces")
                        .map(|bytes| Some(bytes.0))?;
                }
                _ => {}
            }
        }

        let name = name.ok_or_else(|| decoding::Error::missing_field("name"))?;
        let piece_length =
            piece_length.ok_or_else(|| decoding::Error::missing_field("piece length"))?;
        let pieces = pieces.ok_or_else(|| decoding::Error::missing_field("pieces"))?;

        if file_length.is_none() && files.is_none() {
            return Err(decoding::Error::missing_field("length"));
        }

        Ok(Info { file_length, files, name, piece_length, pieces, info_hash })
    }
}
