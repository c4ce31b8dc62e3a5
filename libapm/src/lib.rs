//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

pub mod constraint;
pub mod digest;
pub mod lockfile;
pub mod manifest;
pub mod metadata;
pub mod resolver;
pub mod retry;
