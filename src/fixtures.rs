//! Laptop records shared by unit tests.

use crate::pb::memory::Unit;
use crate::pb::{Cpu, Filter, Laptop, Memory};

pub fn memory(value: u64, unit: Unit) -> Memory {
    Memory {
        value,
        unit: unit as i32,
    }
}

pub fn laptop(id: &str, price: u32, cores: u32, ghz: f64, ram: Memory) -> Laptop {
    Laptop {
        id: id.to_string(),
        brand: "Lenovo".to_string(),
        name: format!("ThinkPad {id}"),
        cpu: Some(Cpu {
            brand: "Intel".to_string(),
            name: "Core i7-1165G7".to_string(),
            number_cores: cores,
            number_threads: cores * 2,
            min_ghz: ghz,
            max_ghz: ghz + 1.5,
        }),
        ram: Some(ram),
        price,
        release_year: 2021,
        ..Default::default()
    }
}

/// Catalog where exactly `"4"` and `"5"` match [`search_filter`].
pub fn search_catalog() -> Vec<Laptop> {
    vec![
        laptop("0", 2_500_000, 4, 2.5, memory(8, Unit::Gigabyte)),
        laptop("1", 1_300_000, 2, 2.5, memory(8, Unit::Gigabyte)),
        laptop("2", 1_300_000, 4, 2.0, memory(8, Unit::Gigabyte)),
        laptop("3", 1_300_000, 4, 2.5, memory(4096, Unit::Megabyte)),
        laptop("4", 1_399_000, 4, 2.5, memory(16, Unit::Gigabyte)),
        laptop("5", 1_000_000, 6, 2.8, memory(64, Unit::Gigabyte)),
    ]
}

pub fn search_filter() -> Filter {
    Filter {
        max_price: 1_400_000,
        min_cpu_cores: 4,
        min_cpu_ghz: 2.5,
        min_ram: Some(memory(8, Unit::Gigabyte)),
    }
}
