//-
// Copyright (c) 2026, the s-nail-lock authors
//
// This file is part of s-nail-lock.
//
// s-nail-lock is free software: you can  redistribute it and/or modify it
// under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// s-nail-lock is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY;  without even the implied warranty of  MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// s-nail-lock. If not, see <http://www.gnu.org/licenses/>.

fn main() {
    s_nail_lock::ps_dotlock::main()
}
