/*
Copyright © 2024–2025 Mako and JayAndJef

This file is part of locOS.

locOS is free software: you can redistribute it and/or modify it under the terms of the GNU General
Public License as published by the Free Software Foundation, either version 3 of the License, or (at
your option) any later version.

locOS is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public
License for more details.

You should have received a copy of the GNU General Public License along with locOS. If not, see
<https://www.gnu.org/licenses/>.
*/

//! The locOS kernel heap.
//!
//! A boundary-tag allocator over a growable virtual range, backed page by page
//! through the kernel's page tables. Kernel init sets up paging, then calls
//! [`memory::init_heap`]; from there on every dynamic allocation goes through
//! [`memory::KERNEL_HEAP`].

#![cfg_attr(not(test), no_std)]

pub mod memory;
pub mod output;
pub mod serial;
