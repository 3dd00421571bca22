// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Course authoring.
//!
//! A course is a list of modules, each a list of lessons pointing at an
//! uploaded video. Only the author may extend a course; `video_path` is
//! whatever URL the object store handed back at upload time.

use crate::base::{CourseId, UserId};
use crate::error::MarketError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One lesson inside a course module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub title: String,
    pub video_path: String,
}

/// A titled group of lessons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseModule {
    pub title: String,
    pub lessons: Vec<Lesson>,
}

#[derive(Debug)]
struct CourseData {
    course_id: CourseId,
    author_id: UserId,
    title: String,
    modules: Vec<CourseModule>,
}

/// Authored course document.
#[derive(Debug)]
pub struct Course {
    inner: Mutex<CourseData>,
}

impl Course {
    pub fn new(course_id: CourseId, author_id: UserId, title: &str) -> Self {
        Self {
            inner: Mutex::new(CourseData {
                course_id,
                author_id,
                title: title.to_owned(),
                modules: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> CourseId {
        self.inner.lock().course_id
    }

    pub fn author_id(&self) -> UserId {
        self.inner.lock().author_id
    }

    pub fn title(&self) -> String {
        self.inner.lock().title.clone()
    }

    pub fn modules(&self) -> Vec<CourseModule> {
        self.inner.lock().modules.clone()
    }

    pub fn module_count(&self) -> usize {
        self.inner.lock().modules.len()
    }

    pub fn lesson_count(&self) -> usize {
        self.inner
            .lock()
            .modules
            .iter()
            .map(|m| m.lessons.len())
            .sum()
    }

    /// Appends a module. Returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`MarketError::AccessDenied`] if `author` is not the
    /// course author.
    pub fn add_module(&self, author: UserId, title: &str) -> Result<usize, MarketError> {
        let mut data = self.inner.lock();
        if author != data.author_id {
            return Err(MarketError::AccessDenied);
        }
        data.modules.push(CourseModule {
            title: title.to_owned(),
            lessons: Vec::new(),
        });
        Ok(data.modules.len() - 1)
    }

    /// Appends a lesson to the module at `module_index`.
    ///
    /// # Errors
    ///
    /// - [`MarketError::AccessDenied`] - `author` is not the course author.
    /// - [`MarketError::ModuleNotFound`] - no module at that index.
    pub fn add_lesson(
        &self,
        author: UserId,
        module_index: usize,
        title: &str,
        video_path: &str,
    ) -> Result<(), MarketError> {
        let mut data = self.inner.lock();
        if author != data.author_id {
            return Err(MarketError::AccessDenied);
        }
        let module = data
            .modules
            .get_mut(module_index)
            .ok_or(MarketError::ModuleNotFound)?;
        module.lessons.push(Lesson {
            title: title.to_owned(),
            video_path: video_path.to_owned(),
        });
        Ok(())
    }
}
