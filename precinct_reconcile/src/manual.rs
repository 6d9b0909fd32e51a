/*!

This is the long-form manual for `precinct_reconcile` and `erjtool`.

## What the reconciliation does

Precinct-level results are the raw material of election joins: each row is a
precinct, each vote column is a (contest, candidate) pair. Two defects make a
plain join with district boundaries wrong:

* **split precincts**: a precinct straddles a district line, and reports votes
  for the contests of two or more districts at the same level. A precinct with
  votes for both the 5th and the 6th congressional districts is split.
* **unattributed votes**: early, mail and provisional ballots are often
  reported for a whole county only. These votes do not belong to any precinct.

The reconciliation fixes both, in a configurable order:

1. the split detector finds the precincts with votes in several districts of
   the same level
2. the splitter cuts each of them along the authoritative district boundaries.
   Every fragment keeps the votes of its own district and becomes a new row
   with key `<precinct>-(<LEVEL>-<district>)`, for example `P2-(CON-05)`.
3. the allocator spreads each county-level pool over the precincts of the
   county, in proportion to the votes they already have for the same race.

The totals of every vote column are checked at the end: they are the totals of
the input plus the allocated pools.

## Contest labels

The vote columns are classified from their labels:

| Label contains                  | Level | District width |
|---------------------------------|-------|----------------|
| `President`                     | `PRE` | (statewide)    |
| `Representative in Congress`    | `CON` | 2              |
| `State Senator`                 | `SU`  | 2              |
| `State Representative`          | `SL`  | 3              |

The district is the token after `District`, zero-padded to the width of the
level. Other contests are rejected, unless they are declared as unclassified
(ballot measures for example). Unclassified columns are never used to detect
splits.

With `standardizeFieldNames`, the output columns are renamed to short
identifiers: election type, race, party, first three letters of the surname.
`U.S. Representative in Congress District 5-John Smith-PARTY:DEM` in a general
election becomes `GCON05DSMI`. Names over 10 characters are reported, since
shapefile attributes are truncated beyond that.

## Proportional allocation

The pool of a group (county) for a race is distributed with the largest
remainder method:

- each precinct receives the integer part of `pool * votes / group votes`
- the votes left are given one by one to the largest fractional parts. Ties
  go to the precinct that comes first in the input.

The computation uses exact integer arithmetic, so the same input always gives
the same output.

Special cases:

- the race has no votes at all in the group: the pool is spread in proportion
  to the total votes of each precinct (all races combined). If the group has no
  votes at all, the pool is spread evenly.
- `allocateToAllEmptyPrecincts`: every precinct legitimately reported zero
  votes. Each precinct counts as one vote, so the pools are spread evenly.

A group with a pool but no precinct stops the run.

## Configuration file

`erjtool --config job.json` reads a JSON file of this form:

```json
{
  "outputSettings": {
    "outputPath": "output/fl_2020.csv",
    "outputShapesPath": "output/fl_2020_shapes.json",
    "standardizeFieldNames": true,
    "electionType": "G"
  },
  "precinctSource": {
    "provider": "csv",
    "filePath": "fl_2020_results.csv",
    "precinctColumn": "pct_std",
    "firstVoteColumnIndex": 5,
    "unclassifiedColumns": ["Amendment 1"],
    "districtColumns": {"CON": "cd", "SU": "sd", "SL": "hd"},
    "shapesPath": "fl_2020_precincts.json"
  },
  "districtSources": [
    {"level": "CON", "filePath": "fl_cd.json"},
    {"level": "SL", "filePath": "fl_hd.json"}
  ],
  "aggregateSource": {
    "filePath": "fl_2020_county_absentee.csv",
    "groupColumn": "county"
  },
  "rules": {
    "splitLevels": ["CON", "SL"],
    "allocationGroup": "county",
    "allocateToAllEmptyPrecincts": false,
    "stageOrder": "splitThenAllocate",
    "excludedPrecincts": []
  }
}
```

Notes:
- `provider` is `csv` or `xlsx`. For Excel files, `excelWorksheetName`
  selects the worksheet (the first one by default).
- `firstVoteColumnIndex` starts at 1 as in spreadsheets. Column letters (`E`)
  are also accepted. The columns before it are attributes, the columns after it
  are vote columns.
- `stageOrder` is `splitThenAllocate` (the default) or `allocateThenSplit`.
- the precinct keys listed in `excludedPrecincts` are never split.

## Shape files

Shapes are JSON arrays of features with a `code`, an optional `name` and a
multipolygon `geometry`:

```json
[{"code": "5", "name": "Fifth", "geometry": [
  {"exterior": [{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 0.0}, {"x": 1.0, "y": 1.0}], "interiors": []}
]}]
```

For precinct shapes, `code` is the precinct key. Rings do not have to be
closed. Invalid shapes are repaired once; a shape that is still invalid
stops the run.

*/
