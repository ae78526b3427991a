//! Turns the finished cluster DAG into streamable pages and the hierarchy that indexes them.

pub mod bit_writer;
pub mod constrain;
pub mod encoding_info;
pub mod hierarchy;
pub mod material;
pub mod pages;
pub mod quantize;
pub mod writer;

/// Bytes of each section of a GPU page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageSections {
    pub cluster: u32,
    pub material_table: u32,
    pub decode_info: u32,
    pub index: u32,
    pub position: u32,
    pub attribute: u32,
}

impl PageSections {
    pub fn material_table_offset(&self) -> u32 {
        self.cluster
    }
    pub fn decode_info_offset(&self) -> u32 {
        self.material_table_offset() + self.material_table
    }
    pub fn index_offset(&self) -> u32 {
        self.decode_info_offset() + self.decode_info
    }
    pub fn position_offset(&self) -> u32 {
        self.index_offset() + self.index
    }
    pub fn attribute_offset(&self) -> u32 {
        self.position_offset() + self.position
    }
    pub fn total(&self) -> u32 {
        self.attribute_offset() + self.attribute
    }

    /// Start of each section when laid out back to back.
    pub fn offsets(&self) -> PageSections {
        PageSections {
            cluster: 0,
            material_table: self.material_table_offset(),
            decode_info: self.decode_info_offset(),
            index: self.index_offset(),
            position: self.position_offset(),
            attribute: self.attribute_offset(),
        }
    }
}

impl std::ops::AddAssign for PageSections {
    fn add_assign(&mut self, rhs: Self) {
        self.cluster += rhs.cluster;
        self.material_table += rhs.material_table;
        self.decode_info += rhs.decode_info;
        self.index += rhs.index;
        self.position += rhs.position;
        self.attribute += rhs.attribute;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_section_offsets() {
        let sizes = PageSections {
            cluster: 128,
            material_table: 16,
            decode_info: 32,
            index: 64,
            position: 8,
            attribute: 4,
        };
        let offsets = sizes.offsets();
        assert_eq!(offsets.material_table, 128);
        assert_eq!(offsets.index, 176);
        assert_eq!(offsets.attribute, 248);
        assert_eq!(sizes.total(), 252);

        let mut sum = sizes;
        sum += sizes;
        assert_eq!(sum.total(), 504);
    }
}
